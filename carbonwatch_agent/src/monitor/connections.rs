//! Live connection table reads from /proc/net.

use std::fs;
use std::io;
use std::path::Path;

const INET_TABLES: [&str; 4] = ["tcp", "tcp6", "udp", "udp6"];
const TCP_TABLES: [&str; 2] = ["tcp", "tcp6"];
// st column value for TCP_ESTABLISHED
const TCP_ESTABLISHED: &str = "01";

/// Number of inet sockets (TCP and UDP, v4 and v6) currently in the kernel tables.
pub fn count_connections() -> io::Result<u32> {
    count_connections_in(Path::new("/proc/net"))
}

/// Number of TCP sockets in ESTABLISHED state.
pub fn count_established() -> io::Result<u32> {
    count_established_in(Path::new("/proc/net"))
}

pub fn count_connections_in(root: &Path) -> io::Result<u32> {
    sum_tables(root, &INET_TABLES, |_| true)
}

pub fn count_established_in(root: &Path) -> io::Result<u32> {
    sum_tables(root, &TCP_TABLES, |st| st == TCP_ESTABLISHED)
}

// Missing v6 tables are normal; only fail if no table at all could be read.
fn sum_tables(root: &Path, tables: &[&str], keep: impl Fn(&str) -> bool) -> io::Result<u32> {
    let mut total = 0u32;
    let mut last_err = None;
    let mut read_any = false;
    for t in tables {
        match fs::read_to_string(root.join(t)) {
            Ok(s) => {
                read_any = true;
                total = total.saturating_add(count_rows(&s, &keep));
            }
            Err(e) => last_err = Some(e),
        }
    }
    match (read_any, last_err) {
        (false, Some(e)) => Err(e),
        _ => Ok(total),
    }
}

// Rows look like: "  0: 0100007F:0277 00000000:0000 0A 00000000:00000000 ..."
fn count_rows(table: &str, keep: &impl Fn(&str) -> bool) -> u32 {
    table
        .lines()
        .skip(1) // header
        .filter_map(|l| l.split_whitespace().nth(3))
        .filter(|st| keep(st))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0277 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 20000 1 0000000000000000 100 0 0 10 0
   1: 0F02000A:0016 0202000A:C8A4 01 00000000:00000000 02:0009F3B5 00000000     0        0 30000 4 0000000000000000 20 4 29 10 -1
   2: 0F02000A:D2B0 5DB8D8AC:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 40000 1 0000000000000000 20 4 30 10 -1
";

    #[test]
    fn counts_all_rows_and_established() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tcp"), TCP).unwrap();
        fs::write(
            dir.path().join("udp"),
            "  sl  local_address rem_address   st\n   0: 00000000:0044 00000000:0000 07\n",
        )
        .unwrap();
        assert_eq!(count_connections_in(dir.path()).unwrap(), 4);
        assert_eq!(count_established_in(dir.path()).unwrap(), 2);
    }

    #[test]
    fn missing_tables_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(count_connections_in(dir.path()).is_err());
    }
}
