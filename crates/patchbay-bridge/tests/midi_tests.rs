//! MIDI Translation Tests
//!
//! Note lifecycles map to create/destroy with a stable instance id,
//! controllers and pitch bend map to control messages, and outbound
//! messages turn back into MIDI bytes.

use patchbay_bridge::midi::{BEND_CHANNEL, CC_CHANNEL, CC_OUT_CHANNEL, NOTE_CHANNEL, NOTE_OUT_CHANNEL};
use patchbay_bridge::MidiTranslator;
use patchbay_core::{ChannelContent, HubMessage, MessageType};

#[test]
fn test_note_on_off_share_instance() {
    let mut midi = MidiTranslator::new("keys");

    let on = midi.decode(&[0x91, 64, 90]);
    assert_eq!(on.len(), 1);
    assert_eq!(on[0].message_type(), MessageType::Create);
    let content = on[0].channel_content().unwrap();
    assert_eq!(content.component, "keys");
    assert_eq!(content.channel, NOTE_CHANNEL);
    assert_eq!(content.key.as_deref(), Some("1"));
    assert_eq!(content.parameter("pitch"), Some(&[64.0][..]));
    assert_eq!(content.parameter("velocity"), Some(&[90.0][..]));
    let instance = on[0].instance().unwrap().to_string();

    let off = midi.decode(&[0x81, 64, 0]);
    assert_eq!(off.len(), 1);
    assert_eq!(off[0].message_type(), MessageType::Destroy);
    assert_eq!(off[0].instance(), Some(instance.as_str()));
    assert_eq!(midi.active_notes(), 0);
}

#[test]
fn test_velocity_zero_is_note_off() {
    let mut midi = MidiTranslator::new("keys");
    let on = midi.decode(&[0x90, 60, 100]);
    let off = midi.decode(&[0x90, 60, 0]);
    assert_eq!(off[0].message_type(), MessageType::Destroy);
    assert_eq!(off[0].instance(), on[0].instance());
}

#[test]
fn test_same_note_on_different_channels_are_separate_instances() {
    let mut midi = MidiTranslator::new("keys");
    let a = midi.decode(&[0x90, 60, 100]);
    let b = midi.decode(&[0x92, 60, 100]);
    assert_ne!(a[0].instance(), b[0].instance());
    assert_eq!(midi.active_notes(), 2);
}

#[test]
fn test_unmatched_note_off_ignored() {
    let mut midi = MidiTranslator::new("keys");
    assert!(midi.decode(&[0x80, 60, 0]).is_empty());
}

#[test]
fn test_control_change_and_pitch_bend() {
    let mut midi = MidiTranslator::new("keys");

    let cc = midi.decode(&[0xB0, 7, 127]);
    assert_eq!(cc[0].message_type(), MessageType::Control);
    let content = cc[0].channel_content().unwrap();
    assert_eq!(content.channel, CC_CHANNEL);
    assert_eq!(content.parameter("cc7"), Some(&[127.0][..]));

    let centre = midi.decode(&[0xE0, 0x00, 0x40]);
    let content = centre[0].channel_content().unwrap();
    assert_eq!(content.channel, BEND_CHANNEL);
    assert_eq!(content.parameter("value"), Some(&[0.0][..]));

    let low = midi.decode(&[0xE0, 0x00, 0x00]);
    assert_eq!(low[0].channel_content().unwrap().parameter("value"), Some(&[-8192.0][..]));
}

#[test]
fn test_truncated_and_unsupported_input() {
    let mut midi = MidiTranslator::new("keys");
    assert!(midi.decode(&[]).is_empty());
    assert!(midi.decode(&[0x90, 60]).is_empty());
    // Program change is not mapped
    assert!(midi.decode(&[0xC0, 5, 0]).is_empty());
}

#[test]
fn test_encode_note_lifecycle() {
    let mut midi = MidiTranslator::new("synth");
    let create = HubMessage::create(
        ChannelContent::new("synth", NOTE_OUT_CHANNEL)
            .with_instance("n1")
            .with_key("2")
            .with_parameter("pitch", vec![64.4])
            .with_parameter("velocity", vec![90.0]),
    )
    .unwrap();
    assert_eq!(midi.encode(&create), vec![vec![0x92, 64, 90]]);

    // Destroy without pitch still releases the note held for the instance
    let destroy =
        HubMessage::destroy(ChannelContent::new("synth", NOTE_OUT_CHANNEL).with_instance("n1")).unwrap();
    assert_eq!(midi.encode(&destroy), vec![vec![0x82, 64, 0]]);
    assert!(midi.encode(&destroy).is_empty());
}

#[test]
fn test_encode_controllers() {
    let mut midi = MidiTranslator::new("synth");
    let control = HubMessage::control(
        ChannelContent::new("synth", CC_OUT_CHANNEL)
            .with_parameter("cc1", vec![200.0])
            .with_parameter("bogus", vec![1.0]),
    )
    .unwrap();
    assert_eq!(midi.encode(&control), vec![vec![0xB0, 1, 127]]);
}
