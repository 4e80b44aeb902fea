#[cfg(test)]
mod tests {
    use umbra_config::{Action, HotkeyBinding};
    use umbra_platform::{Platform, PlatformError, fake::FakePlatform};
    use win_keycode::Chord;

    use crate::{BindingState, BindingTable, HotkeyError};

    fn chord(s: &str) -> Chord {
        Chord::parse(s).expect("chord")
    }

    fn binding(keys: &str, action: Action) -> HotkeyBinding {
        HotkeyBinding {
            keys: chord(keys),
            action,
            enabled: true,
        }
    }

    #[test]
    fn register_walks_the_lifecycle() {
        let p = FakePlatform::default();
        let mut t = BindingTable::new();
        let c = chord("ctrl+shift+t");
        assert_eq!(t.state_of(&c), BindingState::Unregistered);
        let h = t.register(&p, c, Action::Toggle).expect("register");
        assert_eq!(t.state_of(&c), BindingState::Active(h));
        assert_eq!(t.lookup(h), Some((c, Action::Toggle)));
        t.unregister(&p, &c);
        assert_eq!(t.state_of(&c), BindingState::Unregistered);
        assert_eq!(t.lookup(h), None);
        assert!(p.registered().is_empty());
    }

    #[test]
    fn second_register_of_active_chord_conflicts() {
        let p = FakePlatform::default();
        let mut t = BindingTable::new();
        let c = chord("alt+d");
        t.register(&p, c, Action::Dark).expect("first");
        assert_eq!(
            t.register(&p, c, Action::Light),
            Err(HotkeyError::Conflict(c))
        );
        assert_eq!(p.registered(), vec![c]);
    }

    #[test]
    fn apply_keeps_successes_and_reports_failures() {
        let p = FakePlatform::default();
        let busy = chord("ctrl+alt+b");
        p.claim_elsewhere(busy);
        let mut t = BindingTable::new();
        t.apply(&p, &[binding("ctrl+f1", Action::Light)]);

        let report = t.apply(
            &p,
            &[
                binding("ctrl+shift+t", Action::Toggle),
                binding("ctrl+alt+b", Action::Dark),
                binding("ctrl+shift+t", Action::Dark),
                HotkeyBinding {
                    enabled: false,
                    ..binding("ctrl+f2", Action::Light)
                },
            ],
        );
        let t_chord = chord("ctrl+shift+t");
        assert_eq!(report.registered, vec![t_chord]);
        assert_eq!(report.failed.len(), 2);
        assert!(matches!(
            &report.failed[0],
            (c, HotkeyError::Platform { source: PlatformError::ResourceBusy(_), .. }) if *c == busy
        ));
        assert_eq!(report.failed[1], (t_chord, HotkeyError::Conflict(t_chord)));
        // Old binding removed, new one kept despite the failures.
        assert_eq!(p.registered(), vec![t_chord]);
        assert_eq!(t.active(), vec![t_chord]);
    }

    #[test]
    fn disabled_chords_are_skipped_by_later_applies() {
        let p = FakePlatform::default();
        let mut t = BindingTable::new();
        let bindings = [binding("ctrl+shift+t", Action::Toggle)];
        t.apply(&p, &bindings);
        t.disable(&p, chord("ctrl+shift+t"));
        assert!(p.registered().is_empty());
        assert!(t.is_disabled(&chord("ctrl+shift+t")));
        let report = t.apply(&p, &bindings);
        assert_eq!(report.skipped, vec![chord("ctrl+shift+t")]);
        assert!(!report.is_clean());
    }

    #[test]
    fn clear_unregisters_everything() {
        let p = FakePlatform::default();
        let mut t = BindingTable::new();
        t.apply(
            &p,
            &[binding("ctrl+1", Action::Light), binding("ctrl+2", Action::Dark)],
        );
        assert_eq!(p.registered().len(), 2);
        let stale = p.handle_for(&chord("ctrl+1")).expect("handle");
        t.clear(&p);
        assert!(p.registered().is_empty());
        // Unregistering an already-invalid handle is harmless.
        assert!(p.unregister_hotkey(stale).is_ok());
    }
}
