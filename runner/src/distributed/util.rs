use once_cell::sync::Lazy;
use tracing::warn;

/// host name of this node, resolved once per process
pub static HOSTNAME: Lazy<String> = Lazy::new(|| match nix::unistd::gethostname() {
    Ok(hostname) => hostname.to_string_lossy().into_owned(),
    Err(error) => {
        warn!(error = ?error, "Failed to retrieve hostname, worker ids will use 'localhost'");

        String::from("localhost")
    }
});

/// identity of a worker as written to the shared log, e.g. `3@node17`
pub fn worker_id(rank: usize) -> String {
    format!("{rank}@{}", HOSTNAME.as_str())
}
