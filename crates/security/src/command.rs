//! Shell command policy.
//!
//! Three independent checks, applied by `execute_command` and `terminal`:
//!
//! 1. **Injection**: unquoted shell metacharacters are refused outright,
//!    never confirmable.
//! 2. **Blocked**: case-insensitive substring match against the configured
//!    blocklist → requires confirmation at critical risk.
//! 3. **Dangerous**: built-in pattern set (`rm -rf`, `dd if=`, fork bomb,
//!    `curl | sh`, ...) → requires confirmation at high risk.

use relayclaw_core::tool::RiskLevel;

/// Commands matching any of these substrings (case-insensitive) are
/// dangerous regardless of configuration.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm -r",
    "rm -f",
    "del /",
    "format",
    "fdisk",
    "mkfs",
    "dd if=",
    "chmod 777",
    "chown -R",
    "> /dev/",
    ":(){ :|:& };:",
    "wget | sh",
    "curl | sh",
    "curl | bash",
];

/// Metacharacter sequences that, unquoted, chain or redirect commands.
const INJECTION_PATTERNS: &[&str] = &[
    "$(", "${", "`", ";", "&&", "||", "|", "\n", "\r", ">>", "<<",
];

/// The policy's classification of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    /// Safe to run without ceremony.
    Clean,
    /// Contains unquoted shell metacharacters; refuse, never confirm.
    Injection,
    /// Matches the configured blocklist (which entry).
    Blocked(String),
    /// Matches the built-in dangerous set.
    Dangerous,
}

impl CommandVerdict {
    /// Risk level for the confirmation request, when one is needed.
    pub fn risk(&self) -> Option<RiskLevel> {
        match self {
            CommandVerdict::Blocked(_) => Some(RiskLevel::Critical),
            CommandVerdict::Dangerous => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// Configured + built-in command classification.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    blocked: Vec<String>,
}

impl CommandPolicy {
    pub fn new(blocked_commands: Vec<String>) -> Self {
        Self {
            blocked: blocked_commands,
        }
    }

    /// Classify a command. Injection dominates blocked, which dominates
    /// dangerous.
    pub fn check(&self, command: &str) -> CommandVerdict {
        if has_unquoted_metacharacter(command) {
            return CommandVerdict::Injection;
        }

        let lower = command.to_lowercase();
        for entry in &self.blocked {
            if !entry.is_empty() && lower.contains(&entry.to_lowercase()) {
                return CommandVerdict::Blocked(entry.clone());
            }
        }

        if DANGEROUS_PATTERNS.iter().any(|p| lower.contains(p)) {
            return CommandVerdict::Dangerous;
        }

        CommandVerdict::Clean
    }
}

/// True when any injection metacharacter appears outside matched
/// single/double quotes.
fn has_unquoted_metacharacter(command: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;

    for (i, c) in command.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ => {}
        }

        if !in_single && !in_double {
            let rest = &command[i..];
            if INJECTION_PATTERNS.iter().any(|p| rest.starts_with(p)) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command_is_clean() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.check("ls -la /tmp"), CommandVerdict::Clean);
        assert_eq!(policy.check("git status"), CommandVerdict::Clean);
    }

    #[test]
    fn chaining_detected() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.check("ls; rm x"), CommandVerdict::Injection);
        assert_eq!(policy.check("a && b"), CommandVerdict::Injection);
        assert_eq!(policy.check("a || b"), CommandVerdict::Injection);
        assert_eq!(policy.check("cat x | grep y"), CommandVerdict::Injection);
    }

    #[test]
    fn substitution_detected() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.check("echo $(whoami)"), CommandVerdict::Injection);
        assert_eq!(policy.check("echo ${HOME}"), CommandVerdict::Injection);
        assert_eq!(policy.check("echo `id`"), CommandVerdict::Injection);
    }

    #[test]
    fn redirection_and_newlines_detected() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.check("echo hi >> /tmp/f"), CommandVerdict::Injection);
        assert_eq!(policy.check("cat << EOF"), CommandVerdict::Injection);
        assert_eq!(policy.check("ls\nrm x"), CommandVerdict::Injection);
    }

    #[test]
    fn quoted_metacharacters_are_fine() {
        let policy = CommandPolicy::default();
        assert_eq!(
            policy.check("echo 'a; b && c | d'"),
            CommandVerdict::Clean
        );
        assert_eq!(policy.check("echo \"$(not run)\""), CommandVerdict::Clean);
        assert_eq!(policy.check("grep 'a|b' file"), CommandVerdict::Clean);
    }

    #[test]
    fn metachar_after_closing_quote_detected() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.check("echo 'safe'; rm x"), CommandVerdict::Injection);
    }

    #[test]
    fn dangerous_patterns_flagged() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.check("rm -rf /tmp/stuff"), CommandVerdict::Dangerous);
        assert_eq!(
            policy.check("dd if=/dev/zero of=/dev/sda"),
            CommandVerdict::Dangerous
        );
        assert_eq!(policy.check("chmod 777 /etc"), CommandVerdict::Dangerous);
        assert_eq!(policy.check("mkfs.ext4 /dev/sdb1"), CommandVerdict::Dangerous);
    }

    #[test]
    fn dangerous_match_is_case_insensitive() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.check("RM -RF /"), CommandVerdict::Dangerous);
    }

    #[test]
    fn blocklist_wins_over_dangerous() {
        let policy = CommandPolicy::new(vec!["rm".into()]);
        assert_eq!(
            policy.check("rm -rf /tmp/x"),
            CommandVerdict::Blocked("rm".into())
        );
    }

    #[test]
    fn blocklist_is_case_insensitive() {
        let policy = CommandPolicy::new(vec!["shutdown".into()]);
        assert_eq!(
            policy.check("SHUTDOWN -h now"),
            CommandVerdict::Blocked("shutdown".into())
        );
    }

    #[test]
    fn risk_levels() {
        assert_eq!(
            CommandVerdict::Blocked("x".into()).risk(),
            Some(RiskLevel::Critical)
        );
        assert_eq!(CommandVerdict::Dangerous.risk(), Some(RiskLevel::High));
        assert_eq!(CommandVerdict::Clean.risk(), None);
        assert_eq!(CommandVerdict::Injection.risk(), None);
    }

    #[test]
    fn fork_bomb_signature_detected() {
        let policy = CommandPolicy::default();
        // The signature contains metacharacters, so the injection scan
        // fires first — either way it never runs unvetted.
        let verdict = policy.check(":(){ :|:& };:");
        assert_ne!(verdict, CommandVerdict::Clean);
    }
}
