//! Utility functions used in all other atlasgen modules.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use md5::{Digest, Md5};

use crate::error::{AtlasGenError, Result};

/// URL probed by [`check_internet_connection`]. Any response, including an
/// HTTP error status, counts as connected.
pub const CONNECTIVITY_CHECK_URL: &str = "http://www.google.com/";

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}

/// Compute the MD5 digest of a file as a lowercase hex string.
pub fn file_md5<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut file = BufReader::new(File::open(path)?);
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_digest(hasher.finalize().as_slice()))
}

/// Format a digest as a lowercase hex string.
pub fn hex_digest(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Probe a well-known host once before starting the downloads.
///
/// A status error still means the host answered, so only transport-level
/// failures are treated as being offline.
pub fn check_internet_connection() -> Result<()> {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(5))
        .build();
    match agent.head(CONNECTIVITY_CHECK_URL).call() {
        Ok(_) | Err(ureq::Error::Status(_, _)) => Ok(()),
        Err(_) => Err(AtlasGenError::NoInternetConnection),
    }
}
