//! Process naming: decides which group a process belongs to, if any.
//!
//! The grouping engine only sees the [`MatchNamer`] trait. [`MatcherRules`]
//! is the config-file rule list; [`ProcNameNamer`] is the command-line
//! `--procnames` / `--namemapping` alternative.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::process::ProcAttributes;

/// Names a process, or rejects it.
pub trait MatchNamer: Send + Sync {
    /// Returns the group name for a matching process, `None` to exclude it.
    fn match_and_name(&self, attrs: &ProcAttributes) -> Option<String>;
}

/// One matcher rule. Empty fields (and `ppid: 0`) are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matcher {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comm: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmdline: String,
}

impl Matcher {
    /// True if every non-wildcard field agrees with the process.
    pub fn matches(&self, attrs: &ProcAttributes) -> bool {
        if !self.comm.is_empty() && self.comm != attrs.name {
            return false;
        }
        if !self.user.is_empty() && self.user != attrs.username {
            return false;
        }
        if let Some(ppid) = self.ppid {
            if ppid != 0 && ppid != attrs.ppid {
                return false;
            }
        }
        if !self.cmdline.is_empty() && !attrs.cmdline.join(" ").contains(&self.cmdline) {
            return false;
        }
        true
    }
}

/// Ordered rule list, first match wins.
#[derive(Debug, Clone, Default)]
pub struct MatcherRules {
    matchers: Vec<Matcher>,
}

impl MatcherRules {
    pub fn new(matchers: Vec<Matcher>) -> Result<Self, ConfigError> {
        if matchers.is_empty() {
            return Err(ConfigError::NoMatchers);
        }
        if let Some(idx) = matchers.iter().position(|m| m.name.is_empty()) {
            return Err(ConfigError::EmptyMatcherName(idx));
        }
        Ok(Self { matchers })
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }
}

impl MatchNamer for MatcherRules {
    fn match_and_name(&self, attrs: &ProcAttributes) -> Option<String> {
        let m = self.matchers.iter().find(|m| m.matches(attrs))?;
        debug!(
            "[{}] matched proc with [pid: {}, comm: {}, user: {}, ppid: {}, cmdline: {:?}]",
            m.name, attrs.pid, attrs.name, attrs.username, attrs.ppid, attrs.cmdline
        );
        Some(m.name.clone())
    }
}

/// Names processes by command name, optionally remapped through a regex on
/// the command line, and keeps only names in an allow list.
#[derive(Debug, Clone)]
pub struct ProcNameNamer {
    procnames: HashSet<String>,
    mappings: HashMap<String, Regex>,
}

impl ProcNameNamer {
    /// Builds the namer from a list of accepted names and `comm,regex` pairs.
    ///
    /// A process whose comm has a mapping and whose space-joined command line
    /// matches it is named `comm:` followed by the concatenated capture groups.
    pub fn new(procnames: &[String], namemapping: &[String]) -> Result<Self, ConfigError> {
        if procnames.is_empty() {
            return Err(ConfigError::NoMatchers);
        }
        if namemapping.len() % 2 != 0 {
            return Err(ConfigError::OddNameMapping(namemapping.len()));
        }
        let mut mappings = HashMap::new();
        for pair in namemapping.chunks(2) {
            let re = Regex::new(&pair[1]).map_err(|source| ConfigError::InvalidRegex {
                pattern: pair[1].clone(),
                source,
            })?;
            mappings.insert(pair[0].clone(), re);
        }
        Ok(Self {
            procnames: procnames.iter().cloned().collect(),
            mappings,
        })
    }

    fn mapped_name(&self, attrs: &ProcAttributes) -> String {
        let Some(re) = self.mappings.get(&attrs.name) else {
            return attrs.name.clone();
        };
        let cmdline = attrs.cmdline.join(" ");
        match re.captures(&cmdline) {
            Some(caps) => {
                let suffix: String = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str())
                    .collect();
                format!("{}:{}", attrs.name, suffix)
            }
            None => attrs.name.clone(),
        }
    }
}

impl MatchNamer for ProcNameNamer {
    fn match_and_name(&self, attrs: &ProcAttributes) -> Option<String> {
        let name = self.mapped_name(attrs);
        if !self.procnames.contains(&name) {
            return None;
        }
        debug!(
            "[{}] matched proc with [pid: {}, comm: {}, cmdline: {:?}]",
            name, attrs.pid, attrs.name, attrs.cmdline
        );
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32, comm: &str, user: &str, ppid: u32, cmdline: &[&str]) -> ProcAttributes {
        ProcAttributes {
            pid,
            ppid,
            name: comm.to_string(),
            username: user.to_string(),
            cmdline: cmdline.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn rule(name: &str) -> Matcher {
        Matcher {
            name: name.to_string(),
            ..Default::default()
        }
    }

    // -------------------------------------------------------------------------
    // MatcherRules
    // -------------------------------------------------------------------------

    #[test]
    fn test_no_rule_matches_returns_none() {
        let rules = MatcherRules::new(vec![Matcher {
            comm: "nginx".into(),
            ..rule("web")
        }])
        .unwrap();
        assert_eq!(rules.match_and_name(&proc(2, "bash", "root", 1, &[])), None);
    }

    #[test]
    fn test_first_match_wins() {
        let rules = MatcherRules::new(vec![
            Matcher {
                comm: "postgres".into(),
                ..rule("db")
            },
            Matcher {
                user: "postgres".into(),
                ..rule("pg-user")
            },
        ])
        .unwrap();
        let p = proc(10, "postgres", "postgres", 1, &["postgres", "-D", "/data"]);
        assert_eq!(rules.match_and_name(&p).as_deref(), Some("db"));

        // Only the second rule applies to a different comm of the same user.
        let p = proc(11, "psql", "postgres", 1, &["psql"]);
        assert_eq!(rules.match_and_name(&p).as_deref(), Some("pg-user"));
    }

    #[test]
    fn test_all_wildcard_rule_matches_everything() {
        let rules = MatcherRules::new(vec![rule("everything")]).unwrap();
        assert_eq!(
            rules
                .match_and_name(&proc(1, "init", "root", 0, &["/sbin/init"]))
                .as_deref(),
            Some("everything")
        );
        assert_eq!(
            rules.match_and_name(&proc(2, "", "", 0, &[])).as_deref(),
            Some("everything")
        );
    }

    #[test]
    fn test_empty_fields_never_exclude() {
        let p = proc(7, "java", "app", 42, &["java", "-jar", "svc.jar"]);
        // Each rule pins exactly one field and leaves the others as wildcards.
        for m in [
            Matcher {
                comm: "java".into(),
                ..rule("g")
            },
            Matcher {
                user: "app".into(),
                ..rule("g")
            },
            Matcher {
                ppid: Some(42),
                ..rule("g")
            },
            Matcher {
                ppid: Some(0),
                ..rule("g")
            },
            Matcher {
                cmdline: "svc.jar".into(),
                ..rule("g")
            },
        ] {
            assert!(m.matches(&p), "{:?} should match", m);
        }
    }

    #[test]
    fn test_each_field_can_exclude() {
        let p = proc(7, "java", "app", 42, &["java", "-jar", "svc.jar"]);
        for m in [
            Matcher {
                comm: "jav".into(),
                ..rule("g")
            },
            Matcher {
                user: "root".into(),
                ..rule("g")
            },
            Matcher {
                ppid: Some(1),
                ..rule("g")
            },
            Matcher {
                cmdline: "other.jar".into(),
                ..rule("g")
            },
        ] {
            assert!(!m.matches(&p), "{:?} should not match", m);
        }
    }

    #[test]
    fn test_cmdline_is_case_sensitive_substring_of_joined_args() {
        let p = proc(7, "python3", "app", 1, &["python3", "manage.py", "runserver"]);
        let across = Matcher {
            cmdline: "manage.py run".into(),
            ..rule("g")
        };
        assert!(across.matches(&p));

        let upper = Matcher {
            cmdline: "Manage.py".into(),
            ..rule("g")
        };
        assert!(!upper.matches(&p));
    }

    #[test]
    fn test_rules_reject_empty_list_and_empty_names() {
        assert!(matches!(
            MatcherRules::new(Vec::new()),
            Err(ConfigError::NoMatchers)
        ));
        assert!(matches!(
            MatcherRules::new(vec![rule("ok"), rule("")]),
            Err(ConfigError::EmptyMatcherName(1))
        ));
    }

    #[test]
    fn test_matcher_yaml_absent_fields_are_wildcards() {
        let yaml = "- name: web\n  comm: nginx\n- name: batch\n  cmdline: \"--worker\"\n  ppid: 1\n";
        let matchers: Vec<Matcher> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(matchers.len(), 2);
        assert_eq!(matchers[0].comm, "nginx");
        assert!(matchers[0].user.is_empty());
        assert_eq!(matchers[0].ppid, None);
        assert_eq!(matchers[1].ppid, Some(1));
        assert_eq!(matchers[1].cmdline, "--worker");
    }

    // -------------------------------------------------------------------------
    // ProcNameNamer
    // -------------------------------------------------------------------------

    #[test]
    fn test_procnames_accepts_listed_names_only() {
        let namer = ProcNameNamer::new(&["bash".into(), "sshd".into()], &[]).unwrap();
        assert_eq!(
            namer.match_and_name(&proc(1, "bash", "u", 1, &[])).as_deref(),
            Some("bash")
        );
        assert_eq!(namer.match_and_name(&proc(2, "zsh", "u", 1, &[])), None);
    }

    #[test]
    fn test_namemapping_appends_captures() {
        let namer = ProcNameNamer::new(
            &["python2:app".into(), "java:svc".into()],
            &[
                "python2".into(),
                r"([^/]+)\.py".into(),
                "java".into(),
                r"-jar\s+([^/]+).jar".into(),
            ],
        )
        .unwrap();
        let py = proc(1, "python2", "u", 1, &["python2", "/srv/app.py"]);
        assert_eq!(namer.match_and_name(&py).as_deref(), Some("python2:app"));

        let java = proc(2, "java", "u", 1, &["java", "-jar", "svc.jar"]);
        assert_eq!(namer.match_and_name(&java).as_deref(), Some("java:svc"));

        // Remapped name not in the list is rejected.
        let other = proc(3, "python2", "u", 1, &["python2", "/srv/other.py"]);
        assert_eq!(namer.match_and_name(&other), None);
    }

    #[test]
    fn test_namemapping_validation() {
        assert!(matches!(
            ProcNameNamer::new(&["a".into()], &["a".into()]),
            Err(ConfigError::OddNameMapping(1))
        ));
        assert!(matches!(
            ProcNameNamer::new(&["a".into()], &["a".into(), "(".into()]),
            Err(ConfigError::InvalidRegex { .. })
        ));
        assert!(matches!(
            ProcNameNamer::new(&[], &[]),
            Err(ConfigError::NoMatchers)
        ));
    }
}
