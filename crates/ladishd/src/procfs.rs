//! Process ancestry and JACK client ownership from /proc.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Longest parent chain walked before giving up.
const MAX_DEPTH: usize = 64;

/// Parent pid of `pid`, or `None` if the process is gone or unreadable.
pub fn parent_pid(pid: u32) -> Option<u32> {
    let path = PathBuf::from(format!("/proc/{}/stat", pid));
    let stat = std::fs::read_to_string(path).ok()?;
    parse_stat_ppid(&stat)
}

/// Extract the ppid field from a `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain spaces or `)`,
/// so parsing starts after the last `)`.
pub fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// `pid` followed by its ancestors, stopping before init.
pub fn lineage(pid: u32, parent_of: impl Fn(u32) -> Option<u32>) -> Vec<u32> {
    let mut chain = vec![pid];
    let mut current = pid;
    while chain.len() < MAX_DEPTH {
        match parent_of(current) {
            Some(parent) if parent > 1 && !chain.contains(&parent) => {
                chain.push(parent);
                current = parent;
            }
            _ => break,
        }
    }
    chain
}

/// Pid of the process behind the JACK client `name`.
///
/// libjack gives every client a unix socket named `jack_<client>_<uid>_<n>`.
/// Its inode is looked up in `/proc/net/unix` and then among the open file
/// descriptors of every readable process.
pub fn jack_client_pid(name: &str) -> Option<u32> {
    // SAFETY: getuid has no preconditions and cannot fail
    let uid = unsafe { libc::getuid() };
    let table = std::fs::read_to_string("/proc/net/unix").ok()?;
    let inodes = jack_socket_inodes(&table, name, uid);
    if inodes.is_empty() {
        return None;
    }
    socket_owner(Path::new("/proc"), &inodes)
}

/// Inodes of the sockets `client` holds, from a `/proc/net/unix` table.
pub fn jack_socket_inodes(table: &str, client: &str, uid: u32) -> HashSet<u64> {
    let prefix = format!("jack_{}_{}_", client, uid);
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            // Num RefCount Protocol Flags Type St Inode Path
            let fields: Vec<&str> = line.split_whitespace().collect();
            let path = fields.get(7..).filter(|p| !p.is_empty())?.join(" ");
            let file = path.rsplit('/').next()?;
            file.strip_prefix(&prefix)?.parse::<u32>().ok()?;
            fields.get(6)?.parse().ok()
        })
        .collect()
}

/// First pid under `proc_root` with an open descriptor on one of `inodes`.
fn socket_owner(proc_root: &Path, inodes: &HashSet<u64>) -> Option<u32> {
    let mut pids: Vec<u32> = std::fs::read_dir(proc_root)
        .ok()?
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
        .collect();
    pids.sort_unstable();

    pids.into_iter().find(|pid| {
        let Ok(fds) = std::fs::read_dir(proc_root.join(pid.to_string()).join("fd")) else {
            return false;
        };
        fds.filter_map(|fd| std::fs::read_link(fd.ok()?.path()).ok())
            .filter_map(|target| socket_inode(&target.to_string_lossy()))
            .any(|inode| inodes.contains(&inode))
    })
}

/// Inode of a `socket:[12345]` descriptor link.
fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}
