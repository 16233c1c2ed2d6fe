use libproc::libproc::pid_rusage::{RUsageInfoV2, pidrusage};

use super::PlatformExtensions;

pub struct Platform;

impl PlatformExtensions for Platform {
    fn process_pss_kib(pid: u32) -> Option<u64> {
        // Physical footprint is the closest macOS analogue to PSS
        let usage = pidrusage::<RUsageInfoV2>(pid as i32).ok()?;
        Some(usage.ri_phys_footprint / 1024)
    }

    fn process_service_unit(_pid: u32) -> Option<String> {
        // launchd jobs are not discoverable per pid without private APIs
        None
    }
}
