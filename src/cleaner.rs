use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_RULES_YAML: &str = include_str!("../assets/cleaner_rules.yaml");

/// Word lists and line shapes driving [`Cleaner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanerRules {
    #[serde(default)]
    pub drop_prefixes: Vec<String>,
    #[serde(default)]
    pub radio_prefixes: Vec<String>,
    #[serde(default)]
    pub name_denylist: Vec<String>,
    #[serde(default)]
    pub system_name_phrases: Vec<String>,
    #[serde(default)]
    pub banners: Vec<String>,
    #[serde(default)]
    pub system_substrings: Vec<String>,
    #[serde(default)]
    pub drop_patterns: Vec<String>,
    #[serde(default)]
    pub speech_verbs: Vec<String>,
}

impl CleanerRules {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(DEFAULT_RULES_YAML).context("parse built-in cleaner rules")
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let rules: Self = serde_yaml::from_str(raw).context("cleaner rules are not valid YAML")?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read cleaner rules {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid cleaner rules {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let lists = [
            ("drop_prefixes", &self.drop_prefixes),
            ("radio_prefixes", &self.radio_prefixes),
            ("banners", &self.banners),
            ("system_substrings", &self.system_substrings),
            ("speech_verbs", &self.speech_verbs),
        ];
        for (label, entries) in lists {
            if entries.iter().any(|entry| entry.is_empty()) {
                bail!("{label} must not contain empty entries");
            }
        }
        Ok(())
    }
}

/// Two-pass transcript filter compiled from a [`CleanerRules`] set.
#[derive(Debug, Clone)]
pub struct Cleaner {
    rules: CleanerRules,
    banners: HashSet<String>,
    name_re: Regex,
    drop_res: Vec<Regex>,
}

impl Cleaner {
    pub fn new(rules: CleanerRules) -> Result<Self> {
        rules.validate()?;
        let radio = rules
            .radio_prefixes
            .iter()
            .map(|prefix| regex::escape(prefix))
            .collect::<Vec<_>>();
        let name_pattern = if radio.is_empty() {
            r"^([A-Z][a-z]+ [A-Z][a-z]+)".to_owned()
        } else {
            format!(r"^(?:{})?([A-Z][a-z]+ [A-Z][a-z]+)", radio.join("|"))
        };
        let name_re = Regex::new(&name_pattern).context("compile speaker name pattern")?;
        let drop_res = rules
            .drop_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).with_context(|| format!("invalid drop pattern '{pattern}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        let banners = rules.banners.iter().cloned().collect();
        Ok(Self {
            rules,
            banners,
            name_re,
            drop_res,
        })
    }

    pub fn rules(&self) -> &CleanerRules {
        &self.rules
    }

    /// Collects speaker names in first-seen order.
    pub fn discover_names(&self, raw: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for line in raw.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('[') || line.starts_with("((") {
                continue;
            }
            let Some(candidate) = self.name_re.captures(line).and_then(|c| c.get(1)) else {
                continue;
            };
            let candidate = candidate.as_str();
            if self.rules.name_denylist.iter().any(|denied| denied == candidate) {
                continue;
            }
            if !names.iter().any(|known| known == candidate) {
                names.push(candidate.to_owned());
            }
        }
        names
    }

    /// Filters a raw transcript down to story lines. Never fails; lines the
    /// heuristics cannot place are dropped.
    pub fn clean(&self, raw: &str) -> String {
        let names = self.discover_names(raw);
        let mut kept: Vec<String> = Vec::new();
        let mut dropped = 0usize;

        for line in raw.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            if self.is_system_line(line) {
                dropped += 1;
                continue;
            }
            let line = repair_glued_name(line, &names);
            if !self.is_story_line(&line, &names) {
                dropped += 1;
                continue;
            }
            if line.starts_with('>') && kept.last() == Some(&line) {
                dropped += 1;
                continue;
            }
            kept.push(line);
        }

        debug!(
            names = names.len(),
            kept = kept.len(),
            dropped,
            "cleaned chat transcript"
        );
        kept.join("\n")
    }

    fn is_system_line(&self, line: &str) -> bool {
        self.rules
            .drop_prefixes
            .iter()
            .any(|prefix| line.starts_with(prefix.as_str()))
            || self.banners.contains(line)
            || self
                .rules
                .system_substrings
                .iter()
                .any(|needle| line.contains(needle.as_str()))
            || self.drop_res.iter().any(|re| re.is_match(line))
    }

    fn is_story_line(&self, line: &str, names: &[String]) -> bool {
        if line.starts_with('*') || line.starts_with('>') {
            return true;
        }
        let speaker = self
            .rules
            .radio_prefixes
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix.as_str()))
            .unwrap_or(line);
        if !names.iter().any(|name| speaker.starts_with(name.as_str())) {
            return false;
        }
        if self
            .rules
            .system_name_phrases
            .iter()
            .any(|phrase| speaker.starts_with(phrase.as_str()))
        {
            return false;
        }
        line.contains(": ")
            || self
                .rules
                .speech_verbs
                .iter()
                .any(|verb| line.contains(verb.as_str()))
    }
}

/// `> Jane Doewaves` becomes `> Jane Doe waves` for the first known name
/// that prefixes the line.
fn repair_glued_name(line: &str, names: &[String]) -> String {
    if !line.starts_with('>') {
        return line.to_owned();
    }
    for name in names {
        let prefix = format!("> {name}");
        if let Some(rest) = line.strip_prefix(prefix.as_str()) {
            if !rest.is_empty() && !rest.starts_with(' ') {
                return format!("{prefix} {rest}");
            }
            break;
        }
    }
    line.to_owned()
}

/// Cleans with the built-in rule set.
pub fn clean_chat_log(raw: &str) -> Result<String> {
    static DEFAULT_CLEANER: OnceLock<Cleaner> = OnceLock::new();
    if let Some(cleaner) = DEFAULT_CLEANER.get() {
        return Ok(cleaner.clean(raw));
    }
    let cleaner = Cleaner::new(CleanerRules::builtin()?)?;
    Ok(DEFAULT_CLEANER.get_or_init(|| cleaner).clean(raw))
}
