// ABOUTME: Integration tests for application configuration parsing.
// ABOUTME: Tests YAML server entries, defaults, discovery, and registry assembly.

use sshmux::config::*;
use std::fs;
use std::time::Duration;

mod parsing {
    use super::*;

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.openssh, vec![ConfigSource::Path("~/.ssh/config".into())]);
        assert!(config.servers.is_empty());
        assert!(!config.log.enable);
        assert_eq!(config.log.dir, "~/log/sshmux/<Date>/<Hostname>");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.trust_first_connection);
        assert!(config.known_hosts.is_none());
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
openssh:
  - path: ~/.ssh/config
  - command: "cat /etc/sshmux/hosts"

log:
  enable: true
  dir: /var/log/sshmux/<Hostname>
  timestamp: true
  remove_ansi_code: true

connect_timeout: 10s
trust_first_connection: false
known_hosts: ~/.ssh/known_hosts_sshmux

servers:
  web:
    addr: web.example.com
    port: 2222
    user: deploy
    key: ~/.ssh/id_web
    ssh_agent: true
    pre_cmd: "echo start"
    post_cmd: "echo done"
    port_forwards:
      - mode: L
        bind: localhost:8080
        target: localhost:80
      - mode: R
        bind: localhost:9000
        target: localhost:3000
    dynamic_port_forward: "1080"
    nfs_forward:
      port: "2049"
      path: /srv/share
    local_rc: yes
    local_rc_path:
      - ~/.bashrc
      - ~/.aliases
    local_rc_compress: true
    note: production web
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(
            config.openssh,
            vec![
                ConfigSource::Path("~/.ssh/config".into()),
                ConfigSource::Command("cat /etc/sshmux/hosts".into()),
            ]
        );
        assert!(config.log.enable);
        assert!(config.log.timestamp);
        assert!(config.log.remove_ansi_code);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(!config.trust_first_connection);
        assert_eq!(config.known_hosts.as_deref(), Some("~/.ssh/known_hosts_sshmux"));

        let web = &config.servers["web"];
        assert_eq!(web.addr, "web.example.com");
        assert_eq!(web.port, "2222");
        assert_eq!(web.port_number(), Ok(2222));
        assert_eq!(web.user, "deploy");
        assert_eq!(web.identity, Identity::Key("~/.ssh/id_web".into()));
        assert!(web.agent_forward);
        assert_eq!(web.pre_command.as_deref(), Some("echo start"));
        assert_eq!(web.post_command.as_deref(), Some("echo done"));
        assert_eq!(web.forwards.len(), 2);
        assert_eq!(web.forwards[1].direction, ForwardDirection::Remote);
        assert_eq!(web.dynamic_forward.as_deref(), Some("1080"));
        assert_eq!(web.nfs_forward.endpoint(), Some(("2049", "/srv/share")));
        assert_eq!(web.local_rc, LocalRcUse::Enabled);
        assert_eq!(web.local_rc_paths.len(), 2);
        assert!(web.local_rc_compress);
        assert_eq!(web.note, "production web");
    }

    #[test]
    fn server_without_addr_uses_its_name() {
        let yaml = r#"
servers:
  jumpbox:
    user: ops
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.servers["jumpbox"].addr, "jumpbox");
    }

    #[test]
    fn certificate_entry_pairs_with_cert_key() {
        let yaml = r#"
servers:
  signed:
    addr: 10.0.0.8
    cert: ~/.ssh/id-cert.pub
    cert_key: ~/.ssh/id
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.servers["signed"].identity.certificate(),
            Some(("~/.ssh/id-cert.pub", "~/.ssh/id"))
        );
    }

    #[test]
    fn unknown_server_field_is_rejected() {
        let yaml = r#"
servers:
  web:
    addr: web.example.com
    hostname: typo
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn invalid_local_rc_value_is_rejected() {
        let yaml = r#"
servers:
  web:
    local_rc: sometimes
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn missing_user_defaults_to_login_name() {
        temp_env::with_var("USER", Some("operator"), || {
            let config = Config::from_yaml("servers:\n  db:\n    addr: 10.0.0.3\n").unwrap();
            assert_eq!(config.servers["db"].user, "operator");
        });
    }

    #[test]
    fn empty_user_variable_falls_back_like_unset() {
        let unset = temp_env::with_var_unset("USER", current_user);
        let empty = temp_env::with_var("USER", Some(""), current_user);
        assert_eq!(unset, empty);

        #[cfg(unix)]
        if let Ok(out) = std::process::Command::new("id").arg("-un").output() {
            if out.status.success() {
                assert_eq!(unset, String::from_utf8_lossy(&out.stdout).trim());
            }
        }
    }
}

mod discovery {
    use super::*;

    #[test]
    fn discovers_dotfile_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".sshmux.yml"), "connect_timeout: 5s\n").unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn discovers_xdg_style_location() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join(".config/sshmux");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("config.yml"), "trust_first_connection: false\n").unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert!(!config.trust_first_connection);
    }

    #[test]
    fn discover_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::discover(dir.path()),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yml");
        let result = Config::resolve(Some(path.as_path()));
        assert!(matches!(result, Err(ConfigError::Open { .. })));
    }
}

mod registry {
    use super::*;

    #[test]
    fn native_servers_follow_openssh_sources() {
        let dir = tempfile::tempdir().unwrap();
        let ssh_config = dir.path().join("ssh_config");
        fs::write(&ssh_config, "Host box1\n    HostName 10.0.0.1\n").unwrap();

        let yaml = format!(
            "openssh:\n  - path: {}\nservers:\n  box1:\n    addr: 10.0.0.9\n",
            ssh_config.display()
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let (registry, failures) = config.registry();

        assert!(failures.is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("box1").unwrap().addr, "10.0.0.9");

        let prefixed = format!("{}:box1", ssh_config.display());
        assert_eq!(registry.get(&prefixed).unwrap().addr, "10.0.0.1");
        // An exact key beats host-token matches.
        assert_eq!(registry.find("box1"), vec!["box1"]);
    }

    #[test]
    fn duplicate_keys_keep_first_entry() {
        let mut registry = Registry::default();
        assert!(registry.insert("a", ServerDescriptor::new("first", "u")));
        assert!(!registry.insert("a", ServerDescriptor::new("second", "u")));
        assert_eq!(registry.get("a").unwrap().addr, "first");
    }
}
