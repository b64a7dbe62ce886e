/// Utility functions and helpers
use crate::error::{MongoctlError, MongoctlResult};
use mongodb::bson::{Bson, Document};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::debug;

/// Render a command or result document as indented JSON for logs and dry runs
pub fn document_pretty_string(document: &Document) -> String {
    let value = Bson::Document(document.clone()).into_relaxed_extjson();
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| document.to_string())
}

/// Name of an administrative command (its first key)
pub fn command_name(command: &Document) -> String {
    command
        .keys()
        .next()
        .cloned()
        .unwrap_or_else(|| "<empty>".to_string())
}

/// Host name of this machine
pub fn local_hostname() -> String {
    System::host_name().unwrap_or_else(|| "localhost".to_string())
}

/// True if `host` designates this machine.
///
/// `localhost` and `127.0.0.1` are always local; any other host is local when
/// its resolved addresses intersect those of this machine's host name.
pub async fn is_host_local(host: &str) -> MongoctlResult<bool> {
    if host == "localhost" || host == "127.0.0.1" {
        return Ok(true);
    }

    is_same_host(&local_hostname(), host).await
}

/// Returns true if both names are equal or resolve to a common IP address
pub async fn is_same_host(host1: &str, host2: &str) -> MongoctlResult<bool> {
    if host1 == host2 {
        return Ok(true);
    }

    let ips1 = host_ips(host1).await?;
    let ips2 = host_ips(host2).await?;
    Ok(!ips1.is_disjoint(&ips2))
}

/// Resolve every IP address of a host name
pub async fn host_ips(host: &str) -> MongoctlResult<HashSet<IpAddr>> {
    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| MongoctlError::invalid_host(host.to_string(), e.to_string()))?;

    let ips: HashSet<IpAddr> = addrs.map(|addr| addr.ip()).collect();
    debug!("Host '{}' resolves to {:?}", host, ips);
    Ok(ips)
}

/// Expand `file://`, `~` and environment variables, then make the path absolute
pub fn resolve_path(path: &str) -> PathBuf {
    let path = path.trim_start_matches("file://");
    let expanded = expand_vars(&expand_user(path));
    let resolved = PathBuf::from(expanded);

    if resolved.is_absolute() {
        return resolved;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(resolved),
        Err(_) => resolved,
    }
}

fn expand_user(path: &str) -> String {
    match (path.strip_prefix('~'), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}{}", home, rest),
        _ => path.to_string(),
    }
}

fn expand_vars(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if braced && chars.peek() == Some(&'}') {
            chars.next();
        }

        match std::env::var(&name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ if braced => out.push_str(&format!("${{{}}}", name)),
            _ => {
                out.push('$');
                out.push_str(&name);
            }
        }
    }
    out
}

/// Read a pid from the first line of a pid file
pub fn read_pid_file(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    let pid = content.lines().next()?.trim();
    match pid.parse::<u32>() {
        Ok(pid) => Some(pid),
        Err(_) => {
            debug!("Not a valid pid in '{}': '{}'", path.display(), pid);
            None
        }
    }
}

/// Format duration for human-readable output
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_loopback_hosts_are_local() {
        assert!(is_host_local("localhost").await.unwrap());
        assert!(is_host_local("127.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_own_hostname_is_local() {
        let hostname = local_hostname();
        assert!(is_host_local(&hostname).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_host_by_ip() {
        assert!(is_same_host("127.0.0.1", "127.0.0.1").await.unwrap());
        assert!(!is_same_host("127.0.0.1", "192.0.2.10").await.unwrap());
    }

    #[test]
    fn test_document_pretty_string() {
        let command = doc! { "addShard": "rs0/10.0.0.2:27018", "name": "rs0" };
        let pretty = document_pretty_string(&command);
        assert!(pretty.contains("\"addShard\": \"rs0/10.0.0.2:27018\""));
        assert!(pretty.contains('\n'));
    }

    #[test]
    fn test_command_name() {
        assert_eq!(command_name(&doc! { "listShards": 1 }), "listShards");
        assert_eq!(command_name(&Document::new()), "<empty>");
    }

    #[test]
    fn test_resolve_path() {
        std::env::set_var("MONGOCTL_TEST_HOME", "/srv/mongo");
        assert_eq!(
            resolve_path("$MONGOCTL_TEST_HOME/shard1"),
            PathBuf::from("/srv/mongo/shard1")
        );
        assert_eq!(
            resolve_path("file://${MONGOCTL_TEST_HOME}/pid.txt"),
            PathBuf::from("/srv/mongo/pid.txt")
        );
        assert!(resolve_path("relative/dir").is_absolute());
    }

    #[test]
    fn test_read_pid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "4242").unwrap();
        assert_eq!(read_pid_file(file.path()), Some(4242));

        let mut garbage = NamedTempFile::new().unwrap();
        writeln!(garbage, "not-a-pid").unwrap();
        assert_eq!(read_pid_file(garbage.path()), None);

        assert_eq!(read_pid_file(Path::new("/nonexistent/pid.txt")), None);
    }

    #[test]
    fn test_format_duration() {
        use std::time::Duration;

        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h1m1s");
    }
}
