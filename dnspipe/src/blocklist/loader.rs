//! Rule loaders.
//!
//! A matcher DB is built from a plain sequence of textual rules; where
//! those rules come from is abstracted behind `RuleLoader` so file- and
//! HTTP-sourced lists (and fixed in-config lists) all reload the same way.
//! Comment lines (`#`) and blank lines are stripped here so the matchers
//! only ever see rules.

use async_trait::async_trait;

use crate::error::Result;
use crate::ResolveError;

#[async_trait]
pub trait RuleLoader: Send + Sync {
    /// Fetch the current rule set.
    async fn load(&self) -> Result<Vec<String>>;

    /// Source description for log lines.
    fn source(&self) -> String;
}

fn clean(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Loads rules from a local file.
pub struct FileLoader {
    path: String,
}

impl FileLoader {
    pub fn new(path: impl Into<String>) -> Self {
        FileLoader { path: path.into() }
    }
}

#[async_trait]
impl RuleLoader for FileLoader {
    async fn load(&self) -> Result<Vec<String>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ResolveError::config(format!("cannot read {}: {}", self.path, e)))?;
        Ok(clean(&raw))
    }

    fn source(&self) -> String {
        self.path.clone()
    }
}

/// Loads rules over HTTP(S).
pub struct HttpLoader {
    url: String,
    client: reqwest::Client,
}

impl HttpLoader {
    pub fn new(url: impl Into<String>) -> Self {
        HttpLoader {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RuleLoader for HttpLoader {
    async fn load(&self) -> Result<Vec<String>> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::transport(format!(
                "list download from {} failed with {}",
                self.url,
                response.status()
            )));
        }
        Ok(clean(&response.text().await?))
    }

    fn source(&self) -> String {
        self.url.clone()
    }
}

/// Fixed rules from the configuration itself.
pub struct StaticLoader {
    rules: Vec<String>,
}

impl StaticLoader {
    pub fn new(rules: Vec<String>) -> Self {
        StaticLoader { rules }
    }
}

#[async_trait]
impl RuleLoader for StaticLoader {
    async fn load(&self) -> Result<Vec<String>> {
        Ok(self.rules.clone())
    }

    fn source(&self) -> String {
        "static rules".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blanks_are_stripped()  {
        let rules = clean("# header\n\n domain.com  \nother.com # trailing\n");
        assert_eq!(rules, vec!["domain.com".to_string(), "other.com".to_string()]);
    }
}
