//! HECI Message Stress Tests
//!
//! Sustained traffic against the simulated CSE: request and response loops, stalled acknowledgements that back up
//! the command queue, and the flush performed on system reset.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use crate::patina_heci_integration::common::*;

extern crate alloc;
use alloc::{vec, vec::Vec};
use patina_heci::{communicate::HeciChannelStatus, config::HeciConfiguration, ChannelLifecycle};
use r_efi::efi;

fn numbered_message(index: usize) -> Vec<u8> {
    let length = 1 + index % 36;
    (0..length).map(|i| (index + i) as u8).collect()
}

fn drain_until_idle(framework: &HeciTestFramework, limit: usize) {
    for _ in 0..limit {
        if framework.get_status() == (efi::Status::SUCCESS, HeciChannelStatus::Idle) {
            return;
        }
    }
    panic!("channel still busy after {} status calls", limit);
}

#[test]
fn test_many_request_response_round_trips() {
    init_logger();
    let framework = HeciTestFramework::builder().with_echo_responder().build();

    for index in 0..200 {
        let message = numbered_message(index);
        assert_eq!(framework.send(&message), efi::Status::SUCCESS, "send {}", index);

        let (status, response) = framework.read(64);
        assert_eq!(status, efi::Status::SUCCESS, "read {}", index);
        assert_eq!(response, message, "echo mismatch at {}", index);
    }

    assert_eq!(framework.cse.received().len(), 200);
    assert_eq!(framework.cse.unread_sec_slots(), 0);
}

#[test]
fn test_many_blocking_sends_return_their_own_response() {
    init_logger();
    let framework = HeciTestFramework::builder()
        .with_responder(|message| vec![message.iter().map(|b| b.wrapping_add(1)).collect()])
        .build();

    for index in 0..100 {
        let message = numbered_message(index);
        let ack = framework.send_with_ack(&message, 64);
        assert_eq!(ack.status, efi::Status::SUCCESS, "send {}", index);
        assert_eq!(ack.response, message.iter().map(|b| b.wrapping_add(1)).collect::<Vec<_>>());
    }
}

#[test]
fn test_stalled_acknowledgement_backs_up_queue() {
    init_logger();
    let framework = HeciTestFramework::builder().build();
    framework.cse.set_acknowledge(false);

    let messages: Vec<Vec<u8>> = (0..10).map(numbered_message).collect();
    for message in &messages {
        assert_eq!(framework.send(message), efi::Status::SUCCESS);
    }

    // The first message is in flight, the rest wait in the queue.
    assert!(framework.cse.received().is_empty());
    assert_eq!(framework.handler.queued_commands(), 9);
    assert_eq!(framework.get_status(), (efi::Status::SUCCESS, HeciChannelStatus::Busy));

    framework.cse.set_acknowledge(true);
    framework.cse.acknowledge_pending();
    drain_until_idle(&framework, 32);

    assert_eq!(framework.cse.received(), messages);
}

#[test]
fn test_full_queue_reports_out_of_resources() {
    init_logger();
    let config = HeciConfiguration { command_queue_capacity: 0x40, ..fast_configuration() };
    let framework = HeciTestFramework::builder().with_config(config).build();
    framework.cse.set_acknowledge(false);

    // Twelve byte records: 24 bytes each, two fit in 0x40 next to the one in flight.
    let message = [0xA5u8; 12];
    assert_eq!(framework.send(&message), efi::Status::SUCCESS);
    assert_eq!(framework.send(&message), efi::Status::SUCCESS);
    assert_eq!(framework.send(&message), efi::Status::SUCCESS);
    assert_eq!(framework.send(&message), efi::Status::OUT_OF_RESOURCES);
    assert_eq!(framework.handler.queued_commands(), 2);

    framework.cse.set_acknowledge(true);
    framework.cse.acknowledge_pending();
    drain_until_idle(&framework, 8);
    assert_eq!(framework.cse.received().len(), 3);
}

#[test]
fn test_system_reset_flushes_queue_and_closes_channel() {
    init_logger();
    let framework = HeciTestFramework::builder().build();
    assert_eq!(framework.end_of_post(), efi::Status::SUCCESS);
    framework.cse.set_acknowledge(false);

    let messages: Vec<Vec<u8>> = (0..5).map(numbered_message).collect();
    for message in &messages {
        assert_eq!(framework.send(message), efi::Status::SUCCESS);
    }
    assert_eq!(framework.handler.queued_commands(), 4);

    framework.cse.set_acknowledge(true);
    framework.cse.acknowledge_pending();
    assert_eq!(framework.handler.on_system_reset(), Ok(()));

    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::Flushed);
    assert_eq!(framework.handler.queued_commands(), 0);
    assert_eq!(framework.cse.received(), messages);
    assert_eq!(framework.send(&messages[0]), efi::Status::NOT_READY);
}

#[test]
fn test_system_reset_flush_gives_up_on_silent_cse() {
    init_logger();
    let framework = HeciTestFramework::builder().build();
    framework.cse.set_acknowledge(false);

    assert_eq!(framework.send(&[1, 2, 3, 4]), efi::Status::SUCCESS);
    assert_eq!(framework.send(&[5, 6, 7, 8]), efi::Status::SUCCESS);

    assert!(framework.handler.on_system_reset().is_err());
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::Flushed);
    assert_eq!(framework.get_status().0, efi::Status::NOT_READY);
}

#[test]
fn test_multi_burst_responses_are_reassembled() {
    init_logger();
    let framework = HeciTestFramework::builder().build();
    framework.cse.set_response_burst_length(16);

    let response: Vec<u8> = (0..100u8).collect();
    framework.cse.inject(&response);
    assert_eq!(framework.read(128), (efi::Status::SUCCESS, response.clone()));

    framework.cse.inject(&response);
    assert_eq!(framework.read(10), (efi::Status::SUCCESS, response[..10].to_vec()));
    assert_eq!(framework.cse.unread_sec_slots(), 0);
}
