//! YARA rule scanning, behind a narrow trait so the native `yara` crate
//! dependency stays optional. The default build runs the stub scanner,
//! which always reports "no rules loaded" — matching the original
//! project's own graceful degradation when its rules directory is empty.

use std::path::Path;

#[derive(Debug, Clone)]
pub struct YaraMatch {
    pub rule: String,
    pub description: String,
}

pub trait YaraScanner: Send + Sync {
    fn has_rules(&self) -> bool;
    fn scan(&self, path: &Path) -> Vec<YaraMatch>;
}

pub struct NoRulesScanner;

impl YaraScanner for NoRulesScanner {
    fn has_rules(&self) -> bool {
        false
    }

    fn scan(&self, _path: &Path) -> Vec<YaraMatch> {
        Vec::new()
    }
}

#[cfg(feature = "yara-scan")]
pub struct CompiledYaraScanner {
    rules: yara::Rules,
}

#[cfg(feature = "yara-scan")]
impl CompiledYaraScanner {
    pub fn compile_dir(rules_dir: &Path) -> anyhow::Result<Option<Self>> {
        let mut compiler = yara::Compiler::new()?;
        let mut any = false;
        for entry in walkdir::WalkDir::new(rules_dir)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            let is_rule_file = path
                .extension()
                .map(|e| e == "yar" || e == "yara")
                .unwrap_or(false);
            if is_rule_file {
                compiler = compiler.add_rules_file(path)?;
                any = true;
            }
        }
        if !any {
            return Ok(None);
        }
        let rules = compiler.compile_rules()?;
        Ok(Some(Self { rules }))
    }
}

#[cfg(feature = "yara-scan")]
impl YaraScanner for CompiledYaraScanner {
    fn has_rules(&self) -> bool {
        true
    }

    fn scan(&self, path: &Path) -> Vec<YaraMatch> {
        match self.rules.scan_file(path, 10) {
            Ok(results) => results
                .into_iter()
                .map(|m| YaraMatch {
                    rule: m.identifier.to_string(),
                    description: m
                        .metadatas
                        .iter()
                        .find(|md| md.identifier == "description")
                        .map(|md| format!("{:?}", md.value))
                        .unwrap_or_default(),
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Build the scanner appropriate for the active feature set: the real
/// compiled scanner when `yara-scan` is enabled and rules compiled
/// successfully, the no-op stub otherwise.
pub fn build_scanner(_rules_dir: &Path) -> Box<dyn YaraScanner> {
    #[cfg(feature = "yara-scan")]
    {
        if let Ok(Some(scanner)) = CompiledYaraScanner::compile_dir(_rules_dir) {
            return Box::new(scanner);
        }
    }
    Box::new(NoRulesScanner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_reports_no_rules() {
        let scanner = NoRulesScanner;
        assert!(!scanner.has_rules());
        assert!(scanner.scan(Path::new("/bin/sh")).is_empty());
    }
}
