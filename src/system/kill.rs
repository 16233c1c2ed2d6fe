use serde::Deserialize;
use sysinfo::{Pid, Signal, System};

/// Signal used when trimming background processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimSignal {
    #[default]
    Term,
    Kill,
}

impl TrimSignal {
    pub fn name(self) -> &'static str {
        match self {
            TrimSignal::Term => "SIGTERM",
            TrimSignal::Kill => "SIGKILL",
        }
    }

    fn as_sysinfo(self) -> Signal {
        match self {
            TrimSignal::Term => Signal::Term,
            TrimSignal::Kill => Signal::Kill,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered(u32, &'static str),
    Failed(u32, String),
    NotFound(u32),
}

pub fn send_signal(sys: &System, pid: u32, signal: TrimSignal) -> SignalOutcome {
    let sysinfo_pid = Pid::from_u32(pid);
    let Some(process) = sys.process(sysinfo_pid) else {
        return SignalOutcome::NotFound(pid);
    };
    let signal_name = signal.name();
    match process.kill_with(signal.as_sysinfo()) {
        Some(true) => SignalOutcome::Delivered(pid, signal_name),
        Some(false) => {
            SignalOutcome::Failed(pid, format!("failed to send {signal_name} to PID {pid}"))
        }
        // Signal not supported on this platform, fall back to kill()
        None if process.kill() => SignalOutcome::Delivered(pid, signal_name),
        None => SignalOutcome::Failed(pid, format!("failed to kill PID {pid} (permission denied?)")),
    }
}
