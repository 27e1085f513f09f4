//! Channel Lifecycle Tests
//!
//! Initialization, the end of POST and end of services notifications, D0i3 handling, and request validation at the
//! MMI entry point.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use crate::patina_heci_integration::common::*;

extern crate alloc;
use alloc::vec;
use patina_heci::{communicate::HeciChannelStatus, registers::FirmwareStatus, ChannelLifecycle, HeciError};
use r_efi::efi;

#[test]
fn test_initialize_with_ready_interface_skips_reset() {
    init_logger();
    let framework = HeciTestFramework::builder().build();

    assert_eq!(framework.initialize_result(), Ok(()));
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::Active);
    assert_eq!(framework.cse.resets(), 0);
}

#[test]
fn test_initialize_resets_interface_when_sec_not_ready() {
    init_logger();
    let framework = HeciTestFramework::builder().with_sec_not_ready().build();

    assert_eq!(framework.initialize_result(), Ok(()));
    assert_eq!(framework.cse.resets(), 1);
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::Active);
    assert_eq!(framework.send(&[0x01, 0x02]), efi::Status::SUCCESS);
    assert_eq!(framework.cse.received(), vec![vec![0x01, 0x02]]);
}

#[test]
fn test_missing_key_leaves_channel_powered_down() {
    init_logger();
    let framework = HeciTestFramework::builder().without_key().build();

    assert_eq!(framework.initialize_result(), Err(HeciError::SecurityViolation));
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::PoweredDown);
    assert_eq!(framework.send(&[0x01]), efi::Status::NOT_STARTED);
    assert_eq!(framework.get_status().0, efi::Status::NOT_STARTED);
    assert_eq!(framework.raw_function(99), efi::Status::NOT_STARTED);
    assert!(framework.cse.bursts().is_empty());
}

#[test]
fn test_unknown_function_is_unsupported() {
    init_logger();
    let framework = HeciTestFramework::builder().build();

    assert_eq!(framework.raw_function(0), efi::Status::UNSUPPORTED);
    assert_eq!(framework.raw_function(7), efi::Status::UNSUPPORTED);
    assert!(framework.cse.bursts().is_empty());
}

#[test]
fn test_requests_rejected_outside_normal_mode() {
    init_logger();
    let framework = HeciTestFramework::builder().build();

    framework.cse.set_firmware_status(FirmwareStatus::new().with_fw_init_complete(true).with_operation_mode(3));
    assert_eq!(framework.send(&[0x01]), efi::Status::UNSUPPORTED);
    assert_eq!(framework.get_status().0, efi::Status::UNSUPPORTED);

    framework.cse.set_firmware_status(FirmwareStatus::new().with_fw_init_complete(true).with_error_code(1));
    assert_eq!(framework.send(&[0x01]), efi::Status::UNSUPPORTED);

    framework.cse.set_firmware_status(FirmwareStatus::new().with_fw_init_complete(true));
    assert_eq!(framework.send(&[0x01]), efi::Status::SUCCESS);
    assert_eq!(framework.cse.received().len(), 1);
}

#[test]
fn test_end_of_post_registers_reset_notification_once() {
    init_logger();
    let framework = HeciTestFramework::builder().build();

    assert_eq!(framework.end_of_post(), efi::Status::SUCCESS);
    assert_eq!(framework.end_of_post(), efi::Status::SUCCESS);
    assert_eq!(framework.reset_registrations(), 1);
}

#[test]
fn test_end_of_services_without_end_of_post_registers_reset_flush() {
    init_logger();
    let framework = HeciTestFramework::builder().build();
    framework.cse.set_acknowledge(false);
    assert_eq!(framework.send(&[0x01, 0x02]), efi::Status::SUCCESS);
    assert_eq!(framework.send(&[0x03, 0x04]), efi::Status::SUCCESS);

    assert_eq!(framework.end_of_services(), efi::Status::SUCCESS);
    assert_eq!(framework.end_of_post(), efi::Status::SUCCESS);
    assert_eq!(framework.reset_registrations(), 1);

    framework.cse.set_acknowledge(true);
    framework.cse.acknowledge_pending();
    assert_eq!(framework.handler.on_system_reset(), Ok(()));
    assert_eq!(framework.cse.received(), vec![vec![0x01, 0x02], vec![0x03, 0x04]]);
}

#[test]
fn test_link_stays_active_before_end_of_post() {
    init_logger();
    let framework = HeciTestFramework::builder().build();

    assert_eq!(framework.get_status(), (efi::Status::SUCCESS, HeciChannelStatus::Idle));
    assert!(!framework.cse.is_link_idle());
    assert_eq!(framework.cse.d0i3_transitions(), 0);
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::Active);
}

#[test]
fn test_idle_status_after_end_of_post_enters_d0i3() {
    init_logger();
    let framework = HeciTestFramework::builder().build();
    assert_eq!(framework.end_of_post(), efi::Status::SUCCESS);

    assert_eq!(framework.get_status(), (efi::Status::SUCCESS, HeciChannelStatus::Idle));
    assert!(framework.cse.is_link_idle());
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::Idle);

    // Already idle: no further link transitions.
    assert_eq!(framework.get_status(), (efi::Status::SUCCESS, HeciChannelStatus::Idle));
    assert_eq!(framework.cse.d0i3_transitions(), 1);
}

#[test]
fn test_send_wakes_idle_link() {
    init_logger();
    let framework = HeciTestFramework::builder().build();
    assert_eq!(framework.end_of_post(), efi::Status::SUCCESS);
    assert_eq!(framework.get_status().1, HeciChannelStatus::Idle);
    assert!(framework.cse.is_link_idle());

    assert_eq!(framework.send(&[0x0A, 0x0B, 0x0C]), efi::Status::SUCCESS);

    assert!(!framework.cse.is_link_idle());
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::Active);
    assert_eq!(framework.cse.received(), vec![vec![0x0A, 0x0B, 0x0C]]);
}

#[test]
fn test_end_of_services_pins_link_active() {
    init_logger();
    let framework = HeciTestFramework::builder().build();
    assert_eq!(framework.end_of_post(), efi::Status::SUCCESS);
    assert_eq!(framework.get_status().1, HeciChannelStatus::Idle);
    assert!(framework.cse.is_link_idle());

    assert_eq!(framework.end_of_services(), efi::Status::SUCCESS);
    assert!(!framework.cse.is_link_idle());
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::ActiveUntilFlushed);

    assert_eq!(framework.get_status(), (efi::Status::SUCCESS, HeciChannelStatus::Idle));
    assert!(!framework.cse.is_link_idle());
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::ActiveUntilFlushed);
}

#[test]
fn test_flushed_channel_refuses_every_function() {
    init_logger();
    let framework = HeciTestFramework::builder().with_echo_responder().build();
    assert_eq!(framework.handler.on_system_reset(), Ok(()));
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::Flushed);

    assert_eq!(framework.send(&[0x01]), efi::Status::NOT_READY);
    assert_eq!(framework.send_with_ack(&[0x01], 16).status, efi::Status::NOT_READY);
    assert_eq!(framework.read(16).0, efi::Status::NOT_READY);
    assert_eq!(framework.get_status().0, efi::Status::NOT_READY);
    assert_eq!(framework.end_of_post(), efi::Status::NOT_READY);
    assert_eq!(framework.end_of_services(), efi::Status::NOT_READY);
    assert!(framework.cse.bursts().is_empty());

    // A second reset notification is harmless.
    assert_eq!(framework.handler.on_system_reset(), Ok(()));
}

#[test]
fn test_system_reset_before_initialize_is_ignored() {
    init_logger();
    let framework = HeciTestFramework::builder().without_key().build();

    assert_eq!(framework.handler.on_system_reset(), Ok(()));
    assert_eq!(framework.handler.lifecycle(), ChannelLifecycle::PoweredDown);
}
