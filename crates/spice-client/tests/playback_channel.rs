//! Integration tests for the playback channel.
//!
//! A scripted server streams PLAYBACK_* messages through a fully negotiated
//! channel; a [`RecordingSink`] captures what reaches the audio output.

mod common;

use bytes::Bytes;
use common::*;
use spice_client::channel::{event_channel, Channel, ChannelState, ChannelVariant, PlaybackChannel};
use spice_client::infrastructure::audio::mock::{RecordingSink, SinkCall};
use spice_proto::protocol::{
    server_msg, AudioFormat, AudioMode, DataHeader, HeaderLayout, PlaybackModeMessage, PlaybackPacketMessage,
    PlaybackStartMessage, ServerMessage,
};

fn mode(mode: AudioMode) -> ServerMessage {
    ServerMessage::PlaybackMode(PlaybackModeMessage {
        time: 0,
        mode,
        data: Bytes::new(),
    })
}

fn start() -> ServerMessage {
    ServerMessage::PlaybackStart(PlaybackStartMessage {
        channels: 2,
        format: AudioFormat::S16,
        frequency: 48_000,
        time: 5,
    })
}

fn packet(time: u32, data: &'static [u8]) -> ServerMessage {
    ServerMessage::PlaybackData(PlaybackPacketMessage {
        time,
        data: Bytes::from_static(data),
    })
}

#[test]
fn test_raw_stream_reaches_sink_in_order() {
    // Arrange
    let mut h = Harness::playback();
    h.connect_to_ready(&server_caps());

    // Act
    h.deliver(frames(
        HeaderLayout::Mini,
        &[
            mode(AudioMode::Raw),
            start(),
            packet(10, &[1, 2, 3, 4]),
            packet(20, &[5, 6, 7, 8]),
            ServerMessage::PlaybackStop,
        ],
    ))
    .unwrap();

    // Assert
    assert_eq!(
        h.sink.calls(),
        vec![
            SinkCall::Start {
                format: AudioFormat::S16,
                channels: 2,
                frequency: 48_000,
                time: 5,
            },
            SinkCall::Data {
                time: 10,
                data: Bytes::from_static(&[1, 2, 3, 4]),
            },
            SinkCall::Data {
                time: 20,
                data: Bytes::from_static(&[5, 6, 7, 8]),
            },
            SinkCall::Stop,
        ]
    );
    assert!(matches!(
        h.channel.variant(),
        ChannelVariant::Playback(p) if p.mode() == AudioMode::Raw
    ));
}

#[test]
fn test_raw_stream_split_into_single_bytes() {
    // Arrange
    let mut h = Harness::playback();
    h.connect_to_ready(&server_caps());
    let stream = frames(
        HeaderLayout::Mini,
        &[mode(AudioMode::Raw), start(), packet(10, &[9; 32])],
    );

    // Act
    for byte in stream {
        h.deliver(vec![byte]).unwrap();
    }

    // Assert
    let calls = h.sink.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[1],
        SinkCall::Data {
            time: 10,
            data: Bytes::from_static(&[9; 32]),
        }
    );
}

#[test]
fn test_unknown_mode_suppresses_start_and_channel_stays_ready() {
    // Arrange
    let mut h = Harness::playback();
    h.connect_to_ready(&server_caps());

    // Act
    let result = h.deliver(frames(
        HeaderLayout::Mini,
        &[
            mode(AudioMode::Unknown(99)),
            start(),
            packet(10, &[0; 4]),
            ServerMessage::PlaybackStop,
        ],
    ));

    // Assert
    assert!(result.is_ok());
    assert_eq!(h.channel.state(), ChannelState::Ready);
    assert_eq!(h.sink.calls(), vec![SinkCall::Stop]);
}

#[test]
fn test_mode_switch_back_to_raw_resumes_delivery() {
    let mut h = Harness::playback();
    h.connect_to_ready(&server_caps());

    h.deliver(frames(
        HeaderLayout::Mini,
        &[
            mode(AudioMode::Opus),
            start(),
            mode(AudioMode::Raw),
            start(),
        ],
    ))
    .unwrap();

    let calls = h.sink.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], SinkCall::Start { .. }));
}

#[test]
fn test_failing_sink_does_not_break_the_channel() {
    // Arrange
    let mut sink = RecordingSink::new();
    sink.should_fail = true;
    let (tx, events) = event_channel();
    let channel = Channel::new(
        7,
        0,
        ChannelVariant::Playback(PlaybackChannel::new(Box::new(sink.clone()))),
        Box::new(FixedTicket),
        tx,
    );
    let mut h = Harness {
        sink,
        ..Harness::with_channel(channel, events)
    };
    h.connect_to_ready(&server_caps());

    // Act
    let result = h.deliver(frames(
        HeaderLayout::Mini,
        &[mode(AudioMode::Raw), start(), packet(1, &[0; 4])],
    ));

    // Assert
    assert!(result.is_ok());
    assert_eq!(h.channel.state(), ChannelState::Ready);
    assert_eq!(h.sink.calls().len(), 2);
}

#[test]
fn test_truncated_start_is_a_protocol_error() {
    let mut h = Harness::playback();
    h.connect_to_ready(&server_caps());

    let mut frame = Vec::new();
    DataHeader {
        serial: 0,
        msg_type: server_msg::PLAYBACK_START,
        size: 3,
        sub_list: 0,
    }
    .encode(HeaderLayout::Mini, &mut frame);
    frame.extend_from_slice(&[0, 0, 0]);

    let result = h.deliver(frame);

    assert!(result.is_err());
    assert_eq!(h.channel.state(), ChannelState::Unconnected);
    assert!(h.sink.calls().is_empty());
}
