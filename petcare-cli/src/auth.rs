use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::state::ensure_petcare_home;

pub const TOKEN_ENV: &str = "PETCARE_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AuthState {
    pub token: Option<String>,
}

fn auth_path() -> Result<PathBuf> {
    Ok(ensure_petcare_home()?.join("auth.json"))
}

pub fn load_auth_from(p: &Path) -> Result<AuthState> {
    if !p.exists() {
        return Ok(AuthState::default());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn save_auth_to(p: &Path, auth: &AuthState) -> Result<()> {
    let s = serde_json::to_string_pretty(auth)?;
    fs::write(p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

/// The env var wins over the stored token; blank values count as unset.
pub fn pick_token(env: Option<String>, auth: &AuthState) -> Option<String> {
    let usable = |t: &String| !t.trim().is_empty();
    env.filter(usable)
        .or_else(|| auth.token.clone().filter(usable))
        .map(|t| t.trim().to_string())
}

pub fn resolve_token() -> Result<Option<String>> {
    let auth = load_auth_from(&auth_path()?)?;
    Ok(pick_token(std::env::var(TOKEN_ENV).ok(), &auth))
}

fn prompt_secret(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush().ok();
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s.trim().to_string())
}

pub fn set_token(token: Option<String>) -> Result<()> {
    let token = match token {
        Some(t) => t.trim().to_string(),
        None => prompt_secret("Paste API token")?,
    };
    if token.is_empty() {
        bail!("empty token; nothing saved");
    }
    let p = auth_path()?;
    let mut auth = load_auth_from(&p)?;
    auth.token = Some(token);
    save_auth_to(&p, &auth)?;
    println!("Saved token to {}", p.display());
    Ok(())
}

pub fn clear_token() -> Result<()> {
    let p = auth_path()?;
    let mut auth = load_auth_from(&p)?;
    if auth.token.take().is_none() {
        println!("No stored token");
        return Ok(());
    }
    save_auth_to(&p, &auth)?;
    println!("Cleared token in {}", p.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_token_overrides_file() {
        let auth = AuthState {
            token: Some("from-file".to_string()),
        };
        assert_eq!(
            pick_token(Some("from-env".to_string()), &auth).as_deref(),
            Some("from-env")
        );
        assert_eq!(pick_token(None, &auth).as_deref(), Some("from-file"));
    }

    #[test]
    fn blank_tokens_are_unset() {
        let auth = AuthState {
            token: Some("   ".to_string()),
        };
        assert_eq!(pick_token(None, &auth), None);
        assert_eq!(pick_token(Some(String::new()), &AuthState::default()), None);
        let stored = AuthState {
            token: Some("from-file".to_string()),
        };
        assert_eq!(pick_token(Some(" ".to_string()), &stored).as_deref(), Some("from-file"));
    }

    #[test]
    fn auth_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("auth.json");
        assert_eq!(load_auth_from(&p).unwrap(), AuthState::default());

        let auth = AuthState {
            token: Some("t0k".to_string()),
        };
        save_auth_to(&p, &auth).unwrap();
        assert_eq!(load_auth_from(&p).unwrap(), auth);
    }
}
