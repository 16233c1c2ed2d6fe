pub trait PlatformExtensions {
    /// Proportional set size of the process in KiB, where the platform exposes it.
    fn process_pss_kib(pid: u32) -> Option<u64>;
    /// Name of the service unit hosting the process, without its suffix.
    fn process_service_unit(pid: u32) -> Option<String>;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(target_os = "macos")]
use macos as platform_impl;
#[cfg(target_os = "windows")]
use windows as platform_impl;

pub fn process_pss_kib(pid: u32) -> Option<u64> {
    platform_impl::Platform::process_pss_kib(pid)
}

pub fn process_service_unit(pid: u32) -> Option<String> {
    platform_impl::Platform::process_service_unit(pid)
}
