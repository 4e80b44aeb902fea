#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use umbra_platform::Theme;
    use win_keycode::{Chord, Key, Modifiers};

    use crate::*;

    fn minimal(hotkeys: &str) -> String {
        format!("general: {{}}\nhotkeys:\n{hotkeys}")
    }

    #[test]
    fn default_document_binds_ctrl_shift_t() {
        let cfg = default_config().expect("default");
        assert_eq!(cfg.hotkeys.len(), 1);
        let b = cfg.hotkeys[0];
        assert_eq!(b.keys, Chord::new(Modifiers::CONTROL | Modifiers::SHIFT, Key::T));
        assert_eq!(b.action, Action::Toggle);
        assert_eq!(b.action.theme(), Theme::FollowSystem);
        assert_eq!(cfg.general.startup_theme, StartupTheme::Restore);
        assert!(cfg.service.bind.ip().is_loopback());
    }

    #[test]
    fn optional_sections_default_and_unknown_fields_are_ignored() {
        let src = "general:\n  history_size: 7\n  colour: mauve\nhotkeys: []\nextra: 1\n";
        let cfg = parse_str(src).expect("parse");
        assert_eq!(cfg.general.history_size, 7);
        assert_eq!(cfg.advanced, Advanced::default());
        assert_eq!(cfg.windows, WindowsOptions::default());
        assert!(cfg.hotkeys.is_empty());
    }

    #[test]
    fn missing_required_section_is_a_parse_error() {
        let err = parse_str("general: {}\n").expect_err("hotkeys missing");
        assert_eq!(err.code(), "ConfigParse");
        assert!(err.to_string().contains("hotkeys"), "{err}");
    }

    #[test]
    fn parse_error_reports_location() {
        let err = parse_str("general:\n  history_size: [\nhotkeys: []\n").expect_err("bad yaml");
        match err {
            ConfigError::Parse { line, excerpt, .. } => {
                assert!(line.is_some());
                assert!(excerpt.is_some_and(|e| e.contains('^')));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_enabled_chords_conflict() {
        let src = minimal(
            "  - {keys: ctrl+shift+t, action: toggle}\n  - {keys: Shift+Ctrl+T, action: dark}\n",
        );
        match parse_str(&src) {
            Err(ConfigError::Conflict { field, message, .. }) => {
                assert_eq!(field, "hotkeys[1].keys");
                assert!(message.contains("hotkeys[0]"), "{message}");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_chord_allowed_when_one_is_disabled() {
        let src = minimal(
            "  - {keys: ctrl+shift+t, action: toggle}\n  - {keys: ctrl+shift+t, action: dark, enabled: false}\n",
        );
        let cfg = parse_str(&src).expect("parse");
        assert_eq!(cfg.enabled_hotkeys().count(), 1);
    }

    #[test]
    fn validation_names_the_field() {
        let cases = [
            (minimal("  - {keys: t, action: toggle}\n"), "hotkeys[0].keys"),
            (minimal("  - {keys: ctrl+nope, action: toggle}\n"), "hotkeys[0].keys"),
            (
                "general: {history_size: 0}\nhotkeys: []\n".to_string(),
                "general.history_size",
            ),
            (
                "general: {}\nhotkeys: []\nservice: {bind: '0.0.0.0:1'}\n".to_string(),
                "service.bind",
            ),
            (
                "general: {}\nhotkeys: []\nservice: {max_connections: 65}\n".to_string(),
                "service.max_connections",
            ),
            (
                "general: {}\nhotkeys: []\nadvanced: {pump_interval_ms: 5}\n".to_string(),
                "advanced.pump_interval_ms",
            ),
            (
                "general: {}\nhotkeys: []\nadvanced: {max_consecutive_failures: 0}\n".to_string(),
                "advanced.max_consecutive_failures",
            ),
        ];
        for (src, want) in cases {
            match parse_str(&src) {
                Err(ConfigError::Validation { field, .. }) => assert_eq!(field, want, "{src}"),
                other => panic!("{src}: expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn save_then_load_is_equivalent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("in.yaml");
        fs::write(
            &src,
            minimal("  - {keys: alt+win+d, action: dark}\n  - {keys: ctrl+f12, action: light, enabled: false}\n")
                + "service: {token: s3cret, max_connections: 2}\nwindows: {apply_system: false}\n",
        )
        .expect("write");
        let first = load(&src).expect("load");

        let out = dir.path().join("nested").join("out.yaml");
        save(&out, &first).expect("save");
        let second = load(&out).expect("reload");
        assert!(first.same_content(&second));
        assert_ne!(first.digest, second.digest);
        assert_eq!(second.hotkeys[0].keys.to_string(), "alt+win+d");
        assert_eq!(second.service.token.as_deref(), Some("s3cret"));
        assert!(!second.platform_options().apply_system);
    }

    #[test]
    fn missing_file_is_not_found_and_init_writes_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("umbra").join("config.yaml");
        assert!(matches!(load(&path), Err(ConfigError::NotFound { .. })));
        let cfg = load_or_init(&path).expect("init");
        assert!(path.exists());
        let reread = load(&path).expect("load written default");
        assert!(cfg.same_content(&reread));
        assert_eq!(cfg.digest, reread.digest);
    }

    #[test]
    fn errors_carry_the_file_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "general: {history_size: 5000}\nhotkeys: []\n").expect("write");
        let err = load(&path).expect_err("invalid");
        assert_eq!(err.path(), Some(path.as_path()));
        assert!(err.pretty().contains("general.history_size"));
    }

    #[test]
    fn state_path_override() {
        let cfg = parse_str("general: {state_path: /tmp/umbra-state.json}\nhotkeys: []\n")
            .expect("parse");
        assert_eq!(cfg.state_path(), PathBuf::from("/tmp/umbra-state.json"));
    }
}
