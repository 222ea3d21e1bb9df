/// Default `(pattern, reason)` blocklist for commands the model proposes.
///
/// Aimed at commands that would take a fleet machine down or cut the hub off
/// from it. This is a tripwire for an overeager model, not a security boundary.
pub fn default_blocklist() -> Vec<(String, String)> {
    vec![
        // Destructive filesystem operations at root
        (r"rm\s+(-[^\s]*)?(\s+-[^\s]*)?\s+/($|\s)".into(), "Recursive deletion at root not allowed".into()),
        (r"rm\s+(-[^\s]*)?(\s+-[^\s]*)?\s+/\*".into(), "Recursive deletion at root not allowed".into()),
        (r"rm\s+-[^\s]*\s+(/etc|/usr|/boot|/var/lib)/?($|\s)".into(), "Deleting a system directory not allowed".into()),
        // System file overwrites
        (r">\s*/etc/(passwd|shadow|sudoers|fstab)\b".into(), "Overwriting /etc account or mount files not allowed".into()),
        (r">\s*/boot/".into(), "Write to /boot not allowed".into()),
        (r">\s*/sys/".into(), "Write to /sys not allowed".into()),
        (r">\s*/proc/".into(), "Write to /proc not allowed".into()),
        // Disk-level destructive operations
        (r"(?i)\bmkfs\b".into(), "Filesystem formatting not allowed".into()),
        (r"(?i)\bdd\b\s.*of=/dev/".into(), "Direct device writes not allowed".into()),
        (r"(?i)\b(wipefs|shred)\b.*/dev/".into(), "Wiping a block device not allowed".into()),
        // Fork bomb patterns
        (r":\(\)\s*\{.*\}".into(), "Fork bomb pattern detected".into()),
        // Taking the machine offline
        (r"(?i)\bshutdown\b".into(), "System shutdown not allowed".into()),
        (r"(?i)\breboot\b".into(), "System reboot not allowed".into()),
        (r"(?i)\bhalt\b".into(), "System halt not allowed".into()),
        (r"(?i)\bpoweroff\b".into(), "System poweroff not allowed".into()),
        (r"(?i)\binit\s+[06]\b".into(), "Runlevel change to halt or reboot not allowed".into()),
        // Cutting off remote access
        (r"(?i)systemctl\s+(stop|disable|mask)\s+(ssh|sshd)\b".into(), "Stopping the SSH service not allowed".into()),
        (r"(?i)\biptables\s+(-F|--flush)\b".into(), "Flushing firewall rules not allowed".into()),
        (r"(?i)\bkill\s+-9\s+-1\b".into(), "Killing every process not allowed".into()),
        // Permission changes at system level
        (r"chmod\s.*\s/($|\s|[a-z])".into(), "Permission changes at root level not allowed".into()),
        (r"chown\s.*\s/($|\s|[a-z])".into(), "Ownership changes at root level not allowed".into()),
        // Piping remote scripts into a shell
        (r"(?i)\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba|z)?sh\b".into(), "Piping a downloaded script into a shell not allowed".into()),
    ]
}
