use super::PlatformExtensions;

pub struct Platform;

#[cfg(target_os = "windows")]
use windows_sys::Win32::{
    Foundation::CloseHandle,
    System::ProcessStatus::{K32GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS, PROCESS_MEMORY_COUNTERS_EX},
    System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_VM_READ},
};

impl PlatformExtensions for Platform {
    #[cfg(target_os = "windows")]
    fn process_pss_kib(pid: u32) -> Option<u64> {
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_VM_READ, 0, pid);
            if handle.is_null() {
                return None;
            }
            let mut counters = std::mem::zeroed::<PROCESS_MEMORY_COUNTERS_EX>();
            let ok = K32GetProcessMemoryInfo(
                handle,
                &mut counters as *mut PROCESS_MEMORY_COUNTERS_EX as *mut PROCESS_MEMORY_COUNTERS,
                std::mem::size_of::<PROCESS_MEMORY_COUNTERS_EX>() as u32,
            );
            CloseHandle(handle);
            if ok == 0 {
                return None;
            }
            // Private bytes, in KiB
            Some(counters.PrivateUsage as u64 / 1024)
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn process_pss_kib(_pid: u32) -> Option<u64> {
        None
    }

    fn process_service_unit(_pid: u32) -> Option<String> {
        None
    }
}
