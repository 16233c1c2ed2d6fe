use super::PlatformExtensions;

pub struct Platform;

impl PlatformExtensions for Platform {
    fn process_pss_kib(pid: u32) -> Option<u64> {
        // smaps_rollup is cheap compared to summing every mapping in smaps
        let path = format!("/proc/{pid}/smaps_rollup");
        let contents = std::fs::read_to_string(path).ok()?;
        parse_pss_kib(&contents)
    }

    fn process_service_unit(pid: u32) -> Option<String> {
        let path = format!("/proc/{pid}/cgroup");
        let contents = std::fs::read_to_string(path).ok()?;
        parse_service_unit(&contents)
    }
}

fn parse_pss_kib(contents: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let rest = line.strip_prefix("Pss:")?;
        rest.trim().trim_end_matches("kB").trim().parse().ok()
    })
}

fn parse_service_unit(contents: &str) -> Option<String> {
    // cgroup v2: single line "0::/path/to/group"
    // cgroup v1: multiple lines "hierarchy-id:controller-list:path"
    for line in contents.lines().rev() {
        let parts: Vec<&str> = line.splitn(3, ':').collect();
        if parts.len() != 3 {
            continue;
        }
        let cgroup_path = parts[2].trim_start_matches('/');
        if let Some(leaf) = cgroup_path.rsplit('/').next()
            && let Some(stem) = leaf.strip_suffix(".service")
            && !stem.is_empty()
        {
            return Some(stem.to_string());
        }
    }
    None
}
