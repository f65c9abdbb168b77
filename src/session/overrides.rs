// ABOUTME: Runtime overrides applied to a per-session copy of a server descriptor.
// ABOUTME: Non-empty values replace descriptor fields; empty values leave them untouched.

use crate::config::{LocalRcUse, ServerDescriptor, StaticForward};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOverrides {
    pub dynamic_forward: Option<String>,
    pub reverse_dynamic_forward: Option<String>,
    pub http_dynamic_forward: Option<String>,
    pub http_reverse_dynamic_forward: Option<String>,
    pub nfs_forward_port: Option<String>,
    pub nfs_forward_path: Option<String>,
    pub nfs_reverse_forward_port: Option<String>,
    pub nfs_reverse_forward_path: Option<String>,
    /// Force the local rc bootstrap on.
    pub use_local_rc: bool,
    /// Force the local rc bootstrap off. Wins over `use_local_rc`.
    pub skip_local_rc: bool,
    /// Appended after the descriptor's own static forwards.
    pub forwards: Vec<StaticForward>,
    pub forward_agent: bool,
}

impl RuntimeOverrides {
    /// Produce the working copy for one session. `template` is never modified.
    pub fn apply(&self, template: &ServerDescriptor) -> ServerDescriptor {
        let mut server = template.clone();

        replace(&mut server.dynamic_forward, &self.dynamic_forward);
        replace(&mut server.reverse_dynamic_forward, &self.reverse_dynamic_forward);
        replace(&mut server.http_dynamic_forward, &self.http_dynamic_forward);
        replace(
            &mut server.http_reverse_dynamic_forward,
            &self.http_reverse_dynamic_forward,
        );
        replace(&mut server.nfs_forward.port, &self.nfs_forward_port);
        replace(&mut server.nfs_forward.path, &self.nfs_forward_path);
        replace(&mut server.nfs_reverse_forward.port, &self.nfs_reverse_forward_port);
        replace(&mut server.nfs_reverse_forward.path, &self.nfs_reverse_forward_path);

        if self.use_local_rc {
            server.local_rc = LocalRcUse::Enabled;
        }
        if self.skip_local_rc {
            server.local_rc = LocalRcUse::Disabled;
        }

        server.forwards.extend(self.forwards.iter().cloned());
        server.agent_forward |= self.forward_agent;

        server
    }
}

fn replace(field: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        *field = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_wins_over_use() {
        let overrides = RuntimeOverrides {
            use_local_rc: true,
            skip_local_rc: true,
            ..Default::default()
        };
        let server = overrides.apply(&ServerDescriptor::default());
        assert_eq!(server.local_rc, LocalRcUse::Disabled);
    }

    #[test]
    fn nfs_halves_override_independently() {
        let mut template = ServerDescriptor::default();
        template.nfs_forward.port = Some("2049".into());
        template.nfs_forward.path = Some("/srv/a".into());

        let overrides = RuntimeOverrides {
            nfs_forward_path: Some("/srv/b".into()),
            ..Default::default()
        };
        let server = overrides.apply(&template);
        assert_eq!(server.nfs_forward.endpoint(), Some(("2049", "/srv/b")));
    }

    /// Run `$check` once per overridable field, with the descriptor field
    /// path and the matching override field.
    macro_rules! each_field {
        ($check:ident) => {
            $check!(dynamic_forward, dynamic_forward);
            $check!(reverse_dynamic_forward, reverse_dynamic_forward);
            $check!(http_dynamic_forward, http_dynamic_forward);
            $check!(http_reverse_dynamic_forward, http_reverse_dynamic_forward);
            $check!(nfs_forward.port, nfs_forward_port);
            $check!(nfs_forward.path, nfs_forward_path);
            $check!(nfs_reverse_forward.port, nfs_reverse_forward_port);
            $check!(nfs_reverse_forward.path, nfs_reverse_forward_path);
        };
    }

    #[test]
    fn non_empty_override_fills_empty_field() {
        macro_rules! check {
            ($($server:ident).+, $over:ident) => {{
                let template = ServerDescriptor::default();
                let overrides = RuntimeOverrides {
                    $over: Some("9090".into()),
                    ..Default::default()
                };
                let server = overrides.apply(&template);
                assert_eq!(server.$($server).+.as_deref(), Some("9090"), "{}", stringify!($over));
                assert_eq!(template.$($server).+, None, "{}", stringify!($over));
            }};
        }
        each_field!(check);
    }

    #[test]
    fn empty_override_keeps_descriptor_value() {
        macro_rules! check {
            ($($server:ident).+, $over:ident) => {{
                let mut template = ServerDescriptor::default();
                template.$($server).+ = Some("1080".into());
                let overrides = RuntimeOverrides {
                    $over: Some(String::new()),
                    ..Default::default()
                };
                let server = overrides.apply(&template);
                assert_eq!(server.$($server).+.as_deref(), Some("1080"), "{}", stringify!($over));
            }};
        }
        each_field!(check);
    }

    #[test]
    fn non_empty_override_replaces_descriptor_value() {
        macro_rules! check {
            ($($server:ident).+, $over:ident) => {{
                let mut template = ServerDescriptor::default();
                template.$($server).+ = Some("1080".into());
                let overrides = RuntimeOverrides {
                    $over: Some("2080".into()),
                    ..Default::default()
                };
                let server = overrides.apply(&template);
                assert_eq!(server.$($server).+.as_deref(), Some("2080"), "{}", stringify!($over));
            }};
        }
        each_field!(check);
    }
}
