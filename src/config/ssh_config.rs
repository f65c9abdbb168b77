// ABOUTME: Parser for OpenSSH client configuration text (Host and Match blocks).
// ABOUTME: Resolves directives per host with first-obtained-value-wins precedence.

use super::error::ConfigError;

/// Condition under which a block's directives apply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    /// Directives before the first `Host`/`Match` line.
    Global,
    /// `Host pattern...`
    Host(Vec<String>),
    /// `Match all`
    MatchAll,
    /// `Match host a,b` or `Match originalhost a,b`
    MatchHost(Vec<String>),
    /// Any other `Match` criteria. Never applies.
    MatchUnsupported(String),
}

impl Condition {
    fn applies_to(&self, host: &str) -> bool {
        match self {
            Condition::Global | Condition::MatchAll => true,
            Condition::Host(patterns) | Condition::MatchHost(patterns) => {
                matches_pattern_list(patterns, host)
            }
            Condition::MatchUnsupported(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Block {
    condition: Condition,
    directives: Vec<(String, String)>,
}

impl Block {
    fn get(&self, key: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed OpenSSH configuration document.
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    blocks: Vec<Block>,
}

impl SshConfig {
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut blocks = vec![Block {
            condition: Condition::Global,
            directives: Vec::new(),
        }];

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = split_directive(line).ok_or_else(|| ConfigError::Parse {
                line: line_no,
                message: format!("missing value for '{}'", line),
            })?;

            if key.eq_ignore_ascii_case("host") {
                let patterns: Vec<String> = value.split_whitespace().map(unquote).collect();
                if patterns.is_empty() {
                    return Err(ConfigError::Parse {
                        line: line_no,
                        message: "Host requires at least one pattern".to_string(),
                    });
                }
                blocks.push(Block {
                    condition: Condition::Host(patterns),
                    directives: Vec::new(),
                });
            } else if key.eq_ignore_ascii_case("match") {
                blocks.push(Block {
                    condition: parse_match(&value, line_no)?,
                    directives: Vec::new(),
                });
            } else if key.eq_ignore_ascii_case("include") {
                tracing::debug!("skipping Include on line {}: {}", line_no, value);
            } else if let Some(block) = blocks.last_mut() {
                block.directives.push((key.to_string(), unquote(&value)));
            }
        }

        Ok(Self { blocks })
    }

    /// All patterns of all `Host` lines, in declaration order.
    pub fn host_patterns(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().flat_map(|block| match &block.condition {
            Condition::Host(patterns) => patterns.iter().map(String::as_str).collect::<Vec<_>>(),
            _ => Vec::new(),
        })
    }

    /// Value of `key` for `host`: the first value found while walking every
    /// applicable block in file order.
    pub fn get(&self, host: &str, key: &str) -> Option<&str> {
        self.blocks
            .iter()
            .filter(|block| block.condition.applies_to(host))
            .find_map(|block| block.get(key))
    }

}

/// Whether a `Host` token is a pattern rather than a concrete host name.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.starts_with('!')
}

/// Cut `line` at the first `#` that starts a token outside double quotes.
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    let mut token_start = true;
    for (index, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '#' if !quoted && token_start => return &line[..index],
            _ => {}
        }
        token_start = c.is_whitespace() || (c == '=' && !quoted);
    }
    line
}

fn split_directive(line: &str) -> Option<(&str, String)> {
    let key_end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let key = &line[..key_end];
    let rest = line[key_end..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim();
    if key.is_empty() || rest.is_empty() {
        return None;
    }
    Some((key, rest.to_string()))
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

fn parse_match(value: &str, line: usize) -> Result<Condition, ConfigError> {
    let mut tokens = value.split_whitespace();
    let criterion = tokens.next().unwrap_or_default().to_ascii_lowercase();
    match criterion.as_str() {
        "all" => Ok(Condition::MatchAll),
        "host" | "originalhost" => {
            let patterns: Vec<String> = tokens
                .next()
                .map(|list| list.split(',').map(unquote).collect())
                .unwrap_or_default();
            if patterns.is_empty() {
                return Err(ConfigError::Parse {
                    line,
                    message: format!("Match {} requires a pattern list", criterion),
                });
            }
            Ok(Condition::MatchHost(patterns))
        }
        _ => {
            tracing::debug!("unsupported Match criteria on line {}: {}", line, value);
            Ok(Condition::MatchUnsupported(value.to_string()))
        }
    }
}

/// A pattern list matches when any positive pattern matches and no negated
/// pattern does.
fn matches_pattern_list(patterns: &[String], host: &str) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if glob_match(negated, host) {
                return false;
            }
        } else if glob_match(pattern, host) {
            matched = true;
        }
    }
    matched
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi].eq_ignore_ascii_case(&t[ti])) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}
