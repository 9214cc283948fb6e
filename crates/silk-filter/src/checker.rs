//! The checker chain: an ordered sequence of predicates evaluated
//! left-to-right against each record.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use silk_record::record::Record;

/// The outcome of one checker in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// Continue evaluating the rest of the chain.
    Pass,
    /// Short-circuit the rest of the chain as if it had passed.
    PassNow,
    /// Short-circuit the rest of the chain as failed.
    Fail,
    /// Drop the record without counting it as pass or fail.
    Ignore,
}

/// One predicate in the chain.
pub trait Checker: Send + Sync {
    fn check(&self, rec: &Record) -> CheckResult;

    /// Whether this checker forces the pipeline to run single-threaded.
    /// Only script/plugin checkers answer `true`.
    fn forces_single_threaded(&self) -> bool {
        false
    }
}

/// A CIDR/protocol/port/time predicate compiled from command-line
/// switches.
pub struct PrimaryChecker {
    pub protocols: Option<Vec<u8>>,
    pub sports: Option<Vec<u16>>,
    pub dports: Option<Vec<u16>>,
    pub saddr_nets: Option<Vec<(IpAddr, u8)>>,
    pub daddr_nets: Option<Vec<(IpAddr, u8)>>,
    pub start_time_ms: Option<(i64, i64)>,
}

impl PrimaryChecker {
    pub fn new() -> Self {
        PrimaryChecker {
            protocols: None,
            sports: None,
            dports: None,
            saddr_nets: None,
            daddr_nets: None,
            start_time_ms: None,
        }
    }

    fn ip_in_nets(ip: &silk_record::ip::FlowIp, nets: &[(IpAddr, u8)]) -> bool {
        let ip_addr: IpAddr = match ip {
            silk_record::ip::FlowIp::V4(v4) => IpAddr::V4(*v4),
            silk_record::ip::FlowIp::V6(v6) => IpAddr::V6(*v6),
        };
        nets.iter().any(|(net, prefix)| addr_in_cidr(ip_addr, *net, *prefix))
    }
}

impl Default for PrimaryChecker {
    fn default() -> Self {
        Self::new()
    }
}

fn addr_in_cidr(addr: IpAddr, net: IpAddr, prefix: u8) -> bool {
    match (addr, net) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            (u32::from(a) & mask) == (u32::from(n) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let mask = if prefix == 0 { 0u128 } else { u128::MAX << (128 - prefix) };
            (u128::from(a) & mask) == (u128::from(n) & mask)
        }
        _ => false,
    }
}

impl Checker for PrimaryChecker {
    fn check(&self, rec: &Record) -> CheckResult {
        if let Some(protocols) = &self.protocols {
            if !protocols.contains(&rec.protocol) {
                return CheckResult::Fail;
            }
        }
        if let Some(sports) = &self.sports {
            if !sports.contains(&rec.source_port) {
                return CheckResult::Fail;
            }
        }
        if let Some(dports) = &self.dports {
            if !dports.contains(&rec.dest_port) {
                return CheckResult::Fail;
            }
        }
        if let Some(nets) = &self.saddr_nets {
            if !Self::ip_in_nets(&rec.source_ip, nets) {
                return CheckResult::Fail;
            }
        }
        if let Some(nets) = &self.daddr_nets {
            if !Self::ip_in_nets(&rec.dest_ip, nets) {
                return CheckResult::Fail;
            }
        }
        if let Some((lo, hi)) = self.start_time_ms {
            if rec.start_time_ms < lo || rec.start_time_ms > hi {
                return CheckResult::Fail;
            }
        }
        CheckResult::Pass
    }
}

/// A filter over an explicit set of `(sIP, dIP, sPort, dPort, protocol)`
/// tuples read from a file.
pub struct NTupleChecker {
    tuples: std::collections::HashSet<(silk_record::ip::FlowIp, silk_record::ip::FlowIp, u16, u16, u8)>,
}

impl NTupleChecker {
    pub fn new(
        tuples: impl IntoIterator<Item = (silk_record::ip::FlowIp, silk_record::ip::FlowIp, u16, u16, u8)>,
    ) -> Self {
        NTupleChecker { tuples: tuples.into_iter().collect() }
    }
}

impl Checker for NTupleChecker {
    fn check(&self, rec: &Record) -> CheckResult {
        let key = (rec.source_ip, rec.dest_ip, rec.source_port, rec.dest_port, rec.protocol);
        if self.tuples.contains(&key) {
            CheckResult::Pass
        } else {
            CheckResult::Fail
        }
    }
}

/// A plugin- or script-supplied checker, represented as a boxed closure
/// escape hatch rather than a C function pointer + `void*` pair.
pub struct ClosureChecker {
    f: Box<dyn Fn(&Record) -> CheckResult + Send + Sync>,
    single_threaded: bool,
}

impl ClosureChecker {
    pub fn new(f: impl Fn(&Record) -> CheckResult + Send + Sync + 'static) -> Self {
        ClosureChecker { f: Box::new(f), single_threaded: false }
    }

    /// A script/Lua-bridge checker: these always force single-threaded
    /// execution.
    pub fn script(f: impl Fn(&Record) -> CheckResult + Send + Sync + 'static) -> Self {
        ClosureChecker { f: Box::new(f), single_threaded: true }
    }
}

impl Checker for ClosureChecker {
    fn check(&self, rec: &Record) -> CheckResult {
        (self.f)(rec)
    }

    fn forces_single_threaded(&self) -> bool {
        self.single_threaded
    }
}

/// The ordered chain of checkers. Registration order follows the
/// command-line switch grouping: primary predicates, then the N-tuple
/// file filter, then plugin checkers, then the script checker.
pub struct CheckerChain {
    checkers: Vec<Arc<dyn Checker>>,
}

impl CheckerChain {
    pub fn new() -> Self {
        CheckerChain { checkers: Vec::new() }
    }

    pub fn push(&mut self, checker: Arc<dyn Checker>) {
        self.checkers.push(checker);
    }

    pub fn forces_single_threaded(&self) -> bool {
        self.checkers.iter().any(|c| c.forces_single_threaded())
    }

    /// Evaluates the chain left-to-right: `Pass` continues, `PassNow`
    /// short-circuits to pass, `Fail` short-circuits to fail, `Ignore`
    /// drops the record immediately.
    pub fn evaluate(&self, rec: &Record) -> CheckResult {
        for checker in &self.checkers {
            match checker.check(rec) {
                CheckResult::Pass => continue,
                CheckResult::PassNow => return CheckResult::Pass,
                CheckResult::Fail => return CheckResult::Fail,
                CheckResult::Ignore => return CheckResult::Ignore,
            }
        }
        CheckResult::Pass
    }
}

impl Default for CheckerChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Guards a chain behind a mutex for cases where a checker (e.g. a
/// stateful script bridge) is not internally synchronized. Unused by the
/// built-in checkers, which are all stateless or use interior atomics,
/// but kept as the documented extension point for a future plugin that
/// isn't.
pub type SharedChain = Arc<Mutex<CheckerChain>>;
