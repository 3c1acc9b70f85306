use anyhow::{anyhow, Result};
use sha2::Digest;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Expand a leading `~` or `~/` to the current user's home directory.
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(rest))
}

/// Render argv as a shell-quoted line for logs.
pub fn format_command_line<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> String {
    let mut words = Vec::with_capacity(args.len() + 1);
    words.push(program.to_string_lossy().to_string());
    words.extend(
        args.iter()
            .map(|arg| arg.as_ref().to_string_lossy().to_string()),
    );
    shell_words::join(words)
}

/// Keep at most `max_bytes` from the end of `text`, on a char boundary.
pub fn tail_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
