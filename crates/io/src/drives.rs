//! Volume model and mount-table parsers
//!
//! The parsers are pure functions over captured command output so they can
//! be unit-tested on any platform; the platform modules feed them live data.

use ahash::AHashMap;

/// Filesystem classification driving the copy strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filesystem {
    Apfs,
    ReFs,
    Ntfs,
    Fat32,
    Fat16,
    Other,
}

impl Filesystem {
    /// Map a Windows "File System Name" value to a classification
    pub fn from_windows_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "REFS" => Filesystem::ReFs,
            "NTFS" => Filesystem::Ntfs,
            "FAT32" => Filesystem::Fat32,
            "FAT16" | "FAT" => Filesystem::Fat16,
            _ => Filesystem::Other,
        }
    }
}

/// A mounted volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub display_name: String,
    pub filesystem: Filesystem,
}

/// Result of drive enumeration: the mountpoint list plus per-mountpoint
/// drive details
#[derive(Debug, Clone, Default)]
pub struct DriveMap {
    pub mountpoints: Vec<String>,
    pub drives: AHashMap<String, Drive>,
}

impl DriveMap {
    pub fn insert(&mut self, mountpoint: String, drive: Drive) {
        if !self.mountpoints.contains(&mountpoint) {
            self.mountpoints.push(mountpoint.clone());
        }
        self.drives.insert(mountpoint, drive);
    }
}

/// Mountpoints under this prefix are system-reserved on macOS and never
/// hold user data
pub const MACOS_SYSTEM_PREFIX: &str = "/System/";

/// Parse `/proc/mounts` into a drive map (Linux).
///
/// Only block devices (`/dev/...`) are kept; pseudo filesystems (proc,
/// sysfs, tmpfs and friends) are not drives.
pub fn parse_proc_mounts(content: &str) -> DriveMap {
    let mut map = DriveMap::default();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mountpoint), Some(_fstype)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if !device.starts_with("/dev/") {
            continue;
        }
        // Octal escapes (\040 for space) appear in mount paths with blanks
        let mountpoint = unescape_mount_path(mountpoint);
        map.insert(
            mountpoint,
            Drive {
                display_name: device.to_string(),
                filesystem: Filesystem::Other,
            },
        );
    }
    map
}

fn unescape_mount_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let digits: String = chars.by_ref().take(3).collect();
            if let Ok(code) = u8::from_str_radix(&digits, 8) {
                out.push(code as char);
                continue;
            }
            out.push(c);
            out.push_str(&digits);
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse BSD `mount` output lines of the form
/// `/dev/disk3s1 on /Volumes/Assets (apfs, local, journaled)` (macOS).
///
/// Returns `(device, mountpoint)` pairs; classification happens separately
/// from the per-device media description.
pub fn parse_bsd_mount_output(content: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in content.lines() {
        let Some((device, rest)) = line.split_once(" on ") else {
            continue;
        };
        if !device.starts_with("/dev/") {
            continue;
        }
        // The mountpoint runs up to the trailing " (fstype, ...)" group
        let mountpoint = match rest.rfind(" (") {
            Some(idx) => &rest[..idx],
            None => rest,
        };
        out.push((device.to_string(), mountpoint.to_string()));
    }
    out
}

/// Extract a field from `diskutil info` output, e.g. `Device / Media Name`
pub fn parse_diskutil_field<'a>(content: &'a str, field: &str) -> Option<&'a str> {
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() == field {
            return Some(value.trim());
        }
    }
    None
}

/// Parse `fsutil fsinfo volumeinfo X:` output into (volume name, filesystem)
/// (Windows)
pub fn parse_fsutil_volume_info(content: &str) -> (Option<String>, Filesystem) {
    let mut volume_name = None;
    let mut filesystem = Filesystem::Other;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Volume Name" => volume_name = Some(value.trim().to_string()),
            "File System Name" => filesystem = Filesystem::from_windows_name(value),
            _ => {}
        }
    }
    (volume_name, filesystem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_mounts_keeps_block_devices_only() {
        let content = "\
proc /proc proc rw,nosuid 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
tmpfs /run tmpfs rw,nosuid 0 0
/dev/sdb1 /mnt/assets ext4 rw 0 0
/dev/sdc1 /mnt/with\\040space vfat rw 0 0
";
        let map = parse_proc_mounts(content);
        assert_eq!(map.mountpoints, vec!["/", "/mnt/assets", "/mnt/with space"]);
        assert_eq!(map.drives["/"].display_name, "/dev/nvme0n1p2");
        assert_eq!(map.drives["/"].filesystem, Filesystem::Other);
    }

    #[test]
    fn test_parse_bsd_mount_output() {
        let content = "\
/dev/disk3s1s1 on / (apfs, sealed, local, read-only, journaled)
devfs on /dev (devfs, local, nobrowse)
/dev/disk5s1 on /Volumes/Project Files (apfs, local, journaled)
";
        let mounts = parse_bsd_mount_output(content);
        assert_eq!(
            mounts,
            vec![
                ("/dev/disk3s1s1".to_string(), "/".to_string()),
                ("/dev/disk5s1".to_string(), "/Volumes/Project Files".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_diskutil_field() {
        let content = "\
   Device Identifier:         disk3s1
   Device / Media Name:       AppleAPFSMedia

   Volume Name:               Macintosh HD
";
        assert_eq!(
            parse_diskutil_field(content, "Device / Media Name"),
            Some("AppleAPFSMedia")
        );
        assert_eq!(
            parse_diskutil_field(content, "Volume Name"),
            Some("Macintosh HD")
        );
        assert_eq!(parse_diskutil_field(content, "Nope"), None);
    }

    #[test]
    fn test_parse_fsutil_volume_info() {
        let content = "\
Volume Name : Archive
Volume Serial Number : 0x4e21dc4b
Max Component Length : 255
File System Name : ReFS
Is ReadWrite
";
        let (name, fs) = parse_fsutil_volume_info(content);
        assert_eq!(name.as_deref(), Some("Archive"));
        assert_eq!(fs, Filesystem::ReFs);
    }

    #[test]
    fn test_windows_name_classification() {
        assert_eq!(Filesystem::from_windows_name("NTFS"), Filesystem::Ntfs);
        assert_eq!(Filesystem::from_windows_name("refs"), Filesystem::ReFs);
        assert_eq!(Filesystem::from_windows_name("FAT32"), Filesystem::Fat32);
        assert_eq!(Filesystem::from_windows_name("FAT16"), Filesystem::Fat16);
        assert_eq!(Filesystem::from_windows_name("exFAT"), Filesystem::Other);
    }
}
