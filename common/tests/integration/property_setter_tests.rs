use std::time::Duration;

use dimmer_common::{
    persistence::{KEY_BRIGHTNESS, KEY_CHANNEL, KEY_FADE_TIME},
    Channel, DeferredEvent, DimmerError, Property, PwmChannel, SetOutcome,
};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::mock_hw::{fade, is_fade_complete, HwCall, MemoryStore, Rig};

// ── Power ─────────────────────────────────────────────────────

#[test]
fn power_on_with_both_channels_commands_a_then_b() {
    let rig = Rig::new();

    assert_eq!(rig.dimmer.set_on("true"), Ok(SetOutcome::Changed));

    assert_eq!(
        rig.calls(),
        vec![
            fade(PwmChannel::A, 1_638, 2_000),
            HwCall::Delay(20),
            fade(PwmChannel::B, 1_638, 2_000),
        ]
    );
    assert!(rig.dimmer.is_on());
    assert!(rig.dimmer.is_fade_in_flight());

    let pending = rig.scheduler.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, Duration::from_millis(2_050));
}

#[test]
fn power_on_with_single_channel_commands_one_output() {
    let rig = Rig::with_store(MemoryStore::with_settings(1, 60, 500));

    rig.dimmer.set_on("true").unwrap();

    assert_eq!(rig.calls(), vec![fade(PwmChannel::B, 4_914, 500)]);
}

#[test]
fn power_off_fades_to_zero_and_persists_settings() {
    let rig = Rig::new();
    rig.turn_on();

    assert_eq!(rig.dimmer.set_on("false"), Ok(SetOutcome::Changed));

    assert_eq!(
        rig.calls(),
        vec![
            fade(PwmChannel::A, 0, 2_000),
            HwCall::Delay(20),
            fade(PwmChannel::B, 0, 2_000),
        ]
    );
    assert!(!rig.dimmer.is_on());
    assert_eq!(rig.store.get(KEY_CHANNEL), Some(2));
    assert_eq!(rig.store.get(KEY_BRIGHTNESS), Some(20));
    assert_eq!(rig.store.get(KEY_FADE_TIME), Some(2_000));
}

#[test]
fn repeated_power_off_writes_nothing_new() {
    let rig = Rig::with_store(MemoryStore::with_settings(2, 20, 2_000));
    rig.turn_on();
    rig.dimmer.set_on("false").unwrap();

    assert_eq!(rig.store.writes(), 0);
}

#[test]
fn power_unchanged_issues_no_commands() {
    let rig = Rig::new();

    assert_eq!(rig.dimmer.set_on("false"), Ok(SetOutcome::Unchanged));
    assert!(rig.calls().is_empty());
}

#[test]
fn power_rejects_non_boolean_text() {
    let rig = Rig::new();

    for raw in ["1", "on", "TRUE", ""] {
        assert!(matches!(
            rig.dimmer.set_on(raw),
            Err(DimmerError::InvalidInput(_))
        ));
    }
    assert!(!rig.dimmer.is_on());
}

#[test]
fn power_off_with_storage_down_still_switches_off() {
    let rig = Rig::new();
    rig.turn_on();
    rig.store.set_unavailable(true);

    assert_eq!(rig.dimmer.set_on("false"), Ok(SetOutcome::Changed));
    assert!(!rig.dimmer.is_on());
}

// ── Busy ──────────────────────────────────────────────────────

#[test]
fn requests_during_fade_are_busy_and_leave_state() {
    let rig = Rig::new();
    rig.dimmer.set_on("true").unwrap();
    rig.clear_calls();

    assert_eq!(rig.dimmer.set_on("false"), Err(DimmerError::Busy));
    assert_eq!(rig.dimmer.set_brightness("80"), Err(DimmerError::Busy));
    assert_eq!(rig.dimmer.set_fade_time("500"), Err(DimmerError::Busy));

    let settings = rig.dimmer.settings();
    assert!(rig.dimmer.is_on());
    assert_eq!(settings.brightness, 20);
    assert_eq!(settings.fade_duration_ms, 2_000);
    assert!(rig.calls().is_empty());

    assert!(rig.finish_fade());
    assert_eq!(rig.dimmer.set_brightness("80"), Ok(SetOutcome::Changed));
}

#[test]
fn stale_fade_completion_is_ignored() {
    let rig = Rig::new();
    rig.dimmer.set_on("true").unwrap();
    let (_, event) = rig.scheduler.take(is_fade_complete).unwrap();
    let DeferredEvent::FadeComplete { generation } = event else {
        unreachable!()
    };

    let stale = DeferredEvent::FadeComplete {
        generation: generation.wrapping_sub(1),
    };
    assert!(rig.dimmer.handle_deferred(stale).is_empty());
    assert!(rig.dimmer.is_fade_in_flight());

    rig.dimmer.handle_deferred(event);
    assert!(!rig.dimmer.is_fade_in_flight());
}

#[test]
fn failed_completion_scheduling_does_not_wedge_busy() {
    let rig = Rig::new();
    rig.scheduler.set_failing(true);

    assert_eq!(rig.dimmer.set_on("true"), Ok(SetOutcome::Changed));
    assert!(!rig.dimmer.is_fade_in_flight());
    assert_eq!(rig.dimmer.set_brightness("50"), Ok(SetOutcome::Changed));
}

// ── Channel ───────────────────────────────────────────────────

#[test]
fn same_channel_is_unchanged() {
    let rig = Rig::new();

    assert_eq!(rig.dimmer.set_channel("A+B"), Ok(SetOutcome::Unchanged));
    assert_eq!(rig.dimmer.set_channel("\"A+B\""), Ok(SetOutcome::Unchanged));
}

#[test]
fn channel_change_while_off_touches_no_hardware() {
    let rig = Rig::new();

    assert_eq!(rig.dimmer.set_channel("B"), Ok(SetOutcome::Changed));
    assert!(rig.calls().is_empty());
    assert_eq!(rig.dimmer.settings().channel, Channel::B);
    assert_eq!(rig.dimmer.previous_channel(), Channel::AB);
}

#[test]
fn switching_a_to_b_darkens_a_then_lights_b() {
    let rig = Rig::with_store(MemoryStore::with_settings(0, 40, 1_000));
    rig.turn_on();

    assert_eq!(rig.dimmer.set_channel("B"), Ok(SetOutcome::Changed));

    assert_eq!(
        rig.calls(),
        vec![
            fade(PwmChannel::A, 0, 1_000),
            HwCall::Delay(20),
            fade(PwmChannel::B, 3_276, 1_000),
        ]
    );
}

#[test]
fn narrowing_to_one_channel_darkens_the_other() {
    let rig = Rig::new();
    rig.turn_on();

    rig.dimmer.set_channel("A").unwrap();

    assert_eq!(rig.calls(), vec![fade(PwmChannel::B, 0, 2_000)]);
}

#[test]
fn channel_change_during_fade_commits_without_hardware() {
    let rig = Rig::with_store(MemoryStore::with_settings(0, 40, 1_000));
    rig.dimmer.set_on("true").unwrap();
    rig.clear_calls();

    assert_eq!(rig.dimmer.set_channel("B"), Ok(SetOutcome::Changed));

    assert!(rig.calls().is_empty());
    assert_eq!(rig.dimmer.settings().channel, Channel::B);
    assert!(rig.dimmer.is_fade_in_flight());
}

#[test]
fn unknown_channel_is_invalid() {
    let rig = Rig::new();

    assert!(matches!(
        rig.dimmer.set_channel("C"),
        Err(DimmerError::InvalidInput(_))
    ));
    assert_eq!(rig.dimmer.settings().channel, Channel::AB);
}

// ── Brightness and fade time ──────────────────────────────────

#[test]
fn brightness_is_clamped_not_rejected() {
    let rig = Rig::new();

    assert_eq!(rig.dimmer.set_brightness("150"), Ok(SetOutcome::Changed));
    assert_eq!(rig.dimmer.settings().brightness, 100);

    assert_eq!(rig.dimmer.set_brightness("-20"), Ok(SetOutcome::Changed));
    assert_eq!(rig.dimmer.settings().brightness, 0);

    assert_eq!(rig.dimmer.set_brightness("0"), Ok(SetOutcome::Unchanged));
    assert!(rig.calls().is_empty());
}

#[test]
fn brightness_while_on_refades_active_outputs() {
    let rig = Rig::with_store(MemoryStore::with_settings(0, 20, 300));
    rig.turn_on();

    assert_eq!(rig.dimmer.set_brightness("100"), Ok(SetOutcome::Changed));

    assert_eq!(rig.calls(), vec![fade(PwmChannel::A, 8_191, 300)]);
    assert_eq!(rig.dimmer.property_value(Property::Brightness), json!(100));
}

#[test]
fn fade_time_is_clamped_and_used_by_next_fade() {
    let rig = Rig::with_store(MemoryStore::with_settings(1, 50, 2_000));

    assert_eq!(rig.dimmer.set_fade_time("20"), Ok(SetOutcome::Changed));
    assert_eq!(rig.dimmer.settings().fade_duration_ms, 100);
    assert_eq!(rig.dimmer.set_fade_time("99999"), Ok(SetOutcome::Changed));
    assert_eq!(rig.dimmer.settings().fade_duration_ms, 10_000);
    assert_eq!(rig.dimmer.set_fade_time("10000"), Ok(SetOutcome::Unchanged));

    rig.dimmer.set_fade_time("750").unwrap();
    rig.dimmer.set_on("true").unwrap();
    assert_eq!(rig.calls(), vec![fade(PwmChannel::B, 4_095, 750)]);
}

#[test]
fn numeric_setters_reject_text() {
    let rig = Rig::new();

    assert!(matches!(
        rig.dimmer.set_brightness("bright"),
        Err(DimmerError::InvalidInput(_))
    ));
    assert!(matches!(
        rig.dimmer.set_fade_time("slow"),
        Err(DimmerError::InvalidInput(_))
    ));
}

// ── Startup and status ────────────────────────────────────────

#[test]
fn startup_uses_defaults_when_storage_empty() {
    let rig = Rig::new();

    let status = rig.dimmer.status();
    assert!(!status.on);
    assert_eq!(status.channel, "A+B");
    assert_eq!(status.brightness, 20);
    assert_eq!(status.fade_time_ms, 2_000);
    assert!(rig.calls().is_empty());
}

#[test]
fn startup_restores_stored_settings() {
    let rig = Rig::with_store(MemoryStore::with_settings(0, 75, 400));

    assert_eq!(rig.dimmer.property_value(Property::Channel), json!("A"));
    assert_eq!(rig.dimmer.property_value(Property::Brightness), json!(75));
    assert_eq!(rig.dimmer.property_value(Property::FadeTime), json!(400));
    assert_eq!(rig.dimmer.property_value(Property::On), json!(false));
}

#[test]
fn status_serializes_with_wire_names() {
    let rig = Rig::new();
    rig.dimmer.set_on("true").unwrap();

    let value = serde_json::to_value(rig.dimmer.status()).unwrap();

    assert_eq!(value["on"], json!(true));
    assert_eq!(value["fadeTime"], json!(2_000));
    assert_eq!(value["fadeInFlight"], json!(true));
    assert_eq!(value["timerRunning"], json!(false));
    assert_eq!(value["dailyOnMinutes"], json!(0));
}
