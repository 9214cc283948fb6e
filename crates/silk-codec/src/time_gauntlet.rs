//! The time gauntlet: deriving `start_time`/`duration` from whatever
//! time fields a template provides, following the priority list (a)-(h).

/// Seconds between the NTP epoch (1900-01-01) and the UNIX epoch
/// (1970-01-01).
pub const NTP_UNIX_EPOCH_OFFSET_SECS: i64 = 2_208_988_800;

/// Decodes a 32-bit NTP "seconds since 1900" field into milliseconds
/// since the UNIX epoch.
pub fn decode_ntp_seconds(ntp_seconds: u32) -> i64 {
    (ntp_seconds as i64 - NTP_UNIX_EPOCH_OFFSET_SECS) * 1000
}

/// Decodes a 64-bit NTP timestamp (32-bit whole seconds since 1900, 32-bit
/// binary fraction) into milliseconds since the UNIX epoch, masking the
/// low 11 bits of the fraction first as required for
/// `dateTimeMicroseconds`.
pub fn decode_ntp_usec(ntp: u64) -> i64 {
    decode_ntp_fraction(ntp, true)
}

/// As [`decode_ntp_usec`] but without the low-bit masking, for
/// `dateTimeNanoseconds` fields (full 32-bit fraction precision).
pub fn decode_ntp_nsec(ntp: u64) -> i64 {
    decode_ntp_fraction(ntp, false)
}

fn decode_ntp_fraction(ntp: u64, mask_low_11: bool) -> i64 {
    let seconds = (ntp >> 32) as u32;
    let mut fraction = (ntp & 0xFFFF_FFFF) as u32;
    if mask_low_11 {
        fraction &= !0x7FF;
    }
    let epoch_seconds = seconds as i64 - NTP_UNIX_EPOCH_OFFSET_SECS;
    let fraction_ms = (fraction as u64 * 1000) >> 32;
    epoch_seconds * 1000 + fraction_ms as i64
}

/// Up-time-based start/end (case (a)): a 32-bit millisecond up-time
/// counter that may roll over between the start and end samples.
/// "Rollover of a 32-bit up-time counter is assumed when
/// the signed difference of candidate up-time and the flow's start-
/// up-time exceeds INT32_MAX" — equivalently, unsigned wrapping
/// subtraction of the two 32-bit counters already yields the correct
/// elapsed duration whether or not a rollover occurred, since a
/// rollover just means the subtraction wraps around 2^32.
pub fn duration_from_sys_up_time(start_up_ms: u32, end_up_ms: u32) -> u32 {
    end_up_ms.wrapping_sub(start_up_ms)
}

/// 2^32, the wrap distance of the 32-bit up-time counter.
const ROLLOVER32: i64 = 1i64 << 32;

/// Corrects the start-time anchor (`systemInitTimeMilliseconds +
/// flowStartSysUpTime`) for a rolled-over up-time counter, mirroring
/// `skipfix.c`'s three-way branch: compute the candidate up-time as
/// `export_time_ms - init_ms`, compare it against the flow's own
/// `flow_start_sys_up_time_ms`, and add or subtract `ROLLOVER32` from the
/// naive sum when the signed difference exceeds `i32::MAX` in either
/// direction.
fn start_ms_from_sys_up_time(init_ms: i64, start_up: u32, export_time_ms: i64) -> i64 {
    let uptime = export_time_ms - init_ms;
    let difference = uptime - start_up as i64;
    let naive = init_ms + start_up as i64;
    if difference > i32::MAX as i64 {
        // upTime was sampled before the record was composed; start rolled over.
        naive + ROLLOVER32
    } else if -difference > i32::MAX as i64 {
        // upTime was sampled after the record was composed; sysUpTime rolled over.
        naive - ROLLOVER32
    } else {
        naive
    }
}

/// Every time-bearing field a template might provide, already decoded to
/// its natural unit. `None` means the template did not carry that field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeFields {
    pub flow_start_sys_up_time_ms: Option<u32>,
    pub flow_end_sys_up_time_ms: Option<u32>,
    pub system_init_time_ms: Option<u64>,
    pub flow_start_milliseconds: Option<i64>,
    pub flow_end_milliseconds: Option<i64>,
    pub flow_start_seconds: Option<u32>,
    pub flow_end_seconds: Option<u32>,
    pub flow_start_microseconds_ntp: Option<u64>,
    pub flow_end_microseconds_ntp: Option<u64>,
    pub flow_start_nanoseconds_ntp: Option<u64>,
    pub flow_end_nanoseconds_ntp: Option<u64>,
    pub flow_start_delta_microseconds: Option<u32>,
    pub flow_end_delta_microseconds: Option<u32>,
    pub flow_duration_milliseconds: Option<u32>,
    pub flow_duration_microseconds: Option<u32>,
}

/// Resolved `(start_time_ms, duration_ms)`.
pub type Resolved = (i64, u32);

/// Runs the priority list (a)-(h) against whichever fields `fields`
/// supplies, using `export_time_ms` (the stream's most recent IPFIX
/// Message Header export time) for delta/no-time-field cases.
pub fn resolve(fields: &TimeFields, export_time_ms: i64) -> Resolved {
    // (a) flowStartSysUpTime + systemInitTime, with rollover handling.
    if let (Some(start_up), Some(end_up), Some(init_ms)) = (
        fields.flow_start_sys_up_time_ms,
        fields.flow_end_sys_up_time_ms,
        fields.system_init_time_ms,
    ) {
        let start_ms = start_ms_from_sys_up_time(init_ms as i64, start_up, export_time_ms);
        let duration = duration_from_sys_up_time(start_up, end_up);
        return (start_ms, duration);
    }

    // (b) flowStartMilliseconds + flowEndMilliseconds.
    if let (Some(start), Some(end)) = (
        fields.flow_start_milliseconds,
        fields.flow_end_milliseconds,
    ) {
        return (start, (end - start).max(0) as u32);
    }

    // (c) flowStartSeconds + flowEndSeconds.
    if let (Some(start), Some(end)) = (fields.flow_start_seconds, fields.flow_end_seconds) {
        let start_ms = start as i64 * 1000;
        let end_ms = end as i64 * 1000;
        return (start_ms, (end_ms - start_ms).max(0) as u32);
    }

    // (d) NTP-encoded micro/nanoseconds.
    if let (Some(start), Some(end)) = (
        fields.flow_start_microseconds_ntp,
        fields.flow_end_microseconds_ntp,
    ) {
        let start_ms = decode_ntp_usec(start);
        let end_ms = decode_ntp_usec(end);
        return (start_ms, (end_ms - start_ms).max(0) as u32);
    }
    if let (Some(start), Some(end)) = (
        fields.flow_start_nanoseconds_ntp,
        fields.flow_end_nanoseconds_ntp,
    ) {
        let start_ms = decode_ntp_nsec(start);
        let end_ms = decode_ntp_nsec(end);
        return (start_ms, (end_ms - start_ms).max(0) as u32);
    }

    // (e) flowStartDeltaMicroseconds relative to export time.
    if let Some(start_delta) = fields.flow_start_delta_microseconds {
        let start_ms = export_time_ms - start_delta as i64 / 1000;
        let end_ms = match fields.flow_end_delta_microseconds {
            Some(end_delta) => export_time_ms - end_delta as i64 / 1000,
            None => start_ms,
        };
        return (start_ms, (end_ms - start_ms).max(0) as u32);
    }

    // (f) a start-only field with a duration field.
    if let Some(duration) = fields
    .flow_duration_milliseconds
    .or(fields.flow_duration_microseconds.map(|us| us / 1000))
    {
        if let Some(start_ms) = start_only(fields) {
            return (start_ms, duration);
        }
    }

    // (g) an end-only field with duration zero.
    if let Some(end_ms) = end_only(fields) {
        return (end_ms, 0);
    }

    // (h) no time fields: use the stream's export time, duration zero.
    (export_time_ms, 0)
}

fn start_only(fields: &TimeFields) -> Option<i64> {
    fields
    .flow_start_milliseconds
    .or(fields.flow_start_seconds.map(|s| s as i64 * 1000))
    .or(fields.flow_start_microseconds_ntp.map(decode_ntp_usec))
    .or(fields.flow_start_nanoseconds_ntp.map(decode_ntp_nsec))
}

fn end_only(fields: &TimeFields) -> Option<i64> {
    fields
    .flow_end_milliseconds
    .or(fields.flow_end_seconds.map(|s| s as i64 * 1000))
    .or(fields.flow_end_microseconds_ntp.map(decode_ntp_usec))
    .or(fields.flow_end_nanoseconds_ntp.map(decode_ntp_nsec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntp_usec_zero_fraction_is_zero_ms() {
        let ntp = (NTP_UNIX_EPOCH_OFFSET_SECS as u64) << 32;
        assert_eq!(decode_ntp_usec(ntp), 0);
    }

    #[test]
    fn ntp_usec_half_second_fraction_is_500ms() {
        let ntp = ((NTP_UNIX_EPOCH_OFFSET_SECS as u64) << 32) | (1u64 << 31);
        assert_eq!(decode_ntp_usec(ntp), 500);
    }

    #[test]
    fn sys_up_time_rollover_wraps_correctly() {
        // sysUpTime rollover: end-uptime less than start-uptime by more
        // than INT32_MAX implies the 32-bit counter wrapped.
        let duration = duration_from_sys_up_time(5000, 100);
        assert_eq!(duration, (1u64 << 32) as u32 - 5000 + 100);
    }

    #[test]
    fn case_a_start_time_corrected_for_uptime_rollover() {
        // init_ms is far enough in the past that export_time_ms - init_ms
        // (the candidate uptime) exceeds flow_start_sys_up_time_ms by more
        // than i32::MAX: the 32-bit counter must have rolled over since
        // the flow started, so ROLLOVER32 is added back onto the naive sum.
        let init_ms = 0i64;
        let start_up: u32 = 1_000;
        let end_up: u32 = 2_000;
        let export_time_ms = ROLLOVER32 + 5_000;
        let fields = TimeFields {
            flow_start_sys_up_time_ms: Some(start_up),
            flow_end_sys_up_time_ms: Some(end_up),
            system_init_time_ms: Some(init_ms as u64),
            ..Default::default()
        };
        let (start_ms, duration) = resolve(&fields, export_time_ms);
        assert_eq!(start_ms, init_ms + start_up as i64 + ROLLOVER32);
        assert_eq!(duration, end_up - start_up);
    }

    #[test]
    fn case_a_no_rollover_when_uptime_is_consistent() {
        let fields = TimeFields {
            flow_start_sys_up_time_ms: Some(1_000),
            flow_end_sys_up_time_ms: Some(2_000),
            system_init_time_ms: Some(500),
            ..Default::default()
        };
        // export_time_ms chosen so uptime (export - init) lands close to
        // flow_start_sys_up_time_ms, well within i32::MAX of it.
        let (start_ms, duration) = resolve(&fields, 1_500);
        assert_eq!(start_ms, 1_500);
        assert_eq!(duration, 1_000);
    }

    #[test]
    fn case_b_milliseconds_pair() {
        let fields = TimeFields {
            flow_start_milliseconds: Some(1_000),
            flow_end_milliseconds: Some(1_500),
            ..Default::default()
        };
        assert_eq!(resolve(&fields, 0), (1_000, 500));
    }

    #[test]
    fn case_h_falls_back_to_export_time() {
        let fields = TimeFields::default();
        assert_eq!(resolve(&fields, 42_000), (42_000, 0));
    }

    #[test]
    fn case_g_end_only_has_zero_duration() {
        let fields = TimeFields {
            flow_end_seconds: Some(100),
            ..Default::default()
        };
        assert_eq!(resolve(&fields, 0), (100_000, 0));
    }
}
