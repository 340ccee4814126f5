#![allow(clippy::unwrap_used)]
// Device session lifecycle, ordering and reconnect behavior.

mod common;

use std::time::Duration;

use ryder_proto::{Command, FirmwareVersion, Response, opcode};

use ryder_core::{ConnectionState, CoreError, FatalError, Readiness};

use common::{FakeRyder, info_reply, session};

// ── Open ────────────────────────────────────────────────────────────

#[tokio::test]
async fn open_identifies_device() {
    let fake = FakeRyder::new();
    let session = session(&fake);
    assert_eq!(session.state(), ConnectionState::Closed);

    let info = session.open().await.unwrap();
    assert_eq!(info.firmware, FirmwareVersion::new(0, 0, 1));
    assert!(info.initialized);
    assert_eq!(session.state(), ConnectionState::Open);
    assert_eq!(fake.log(), vec![vec![opcode::INFO]]);
    assert_eq!(*session.readiness().borrow(), Readiness::Ready(info));
}

#[tokio::test]
async fn open_twice_is_noop() {
    let fake = FakeRyder::new();
    let session = session(&fake);
    session.open().await.unwrap();
    session.open().await.unwrap();
    assert_eq!(fake.connects(), 1);
}

#[tokio::test]
async fn wrong_magic_is_fatal() {
    let fake = FakeRyder::with_info(b"trezor\0\0\0\0".to_vec());
    let session = session(&fake);

    let err = session.open().await.unwrap_err();
    assert!(
        matches!(err, CoreError::Fatal(FatalError::NotRyderDevice { .. })),
        "expected NotRyderDevice, got: {err:?}"
    );
    assert!(err.is_fatal());
    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(fake.closes(), 1);
    assert!(matches!(
        session.wait_ready().await,
        Err(CoreError::Fatal(FatalError::NotRyderDevice { .. }))
    ));
}

#[tokio::test]
async fn unsupported_firmware_is_fatal() {
    let fake = FakeRyder::with_info(info_reply(0, 0, 2));
    let session = session(&fake);

    let err = session.open().await.unwrap_err();
    match err {
        CoreError::Fatal(FatalError::UnsupportedFirmware { found, supported }) => {
            assert_eq!(found, FirmwareVersion::new(0, 0, 2));
            assert_eq!(supported, FirmwareVersion::new(0, 0, 1));
        }
        other => panic!("expected UnsupportedFirmware, got: {other:?}"),
    }
}

#[tokio::test]
async fn open_failure_is_transient() {
    let fake = FakeRyder::new();
    fake.fail_connects(1);
    let session = session(&fake);

    let err = session.open().await.unwrap_err();
    assert!(err.is_transient(), "expected transport error, got: {err:?}");
    assert_eq!(*session.readiness().borrow(), Readiness::Pending);
}

// ── Exchanges ───────────────────────────────────────────────────────

#[tokio::test]
async fn send_before_open_is_not_connected() {
    let session = session(&FakeRyder::new());
    let err = session.send(&Command::new(opcode::INFO)).await.unwrap_err();
    assert!(matches!(err, CoreError::NotConnected));
}

#[tokio::test]
async fn sequences_never_interleave() {
    let fake = FakeRyder::new();
    let session = session(&fake);
    session.open().await.unwrap();

    let mut tasks = Vec::new();
    for number in 0..4u8 {
        let keys = session.clone();
        tasks.push(tokio::spawn(async move {
            keys.request_app_private_key(number, "app.example.com".into()).await
        }));
        let ids = session.clone();
        tasks.push(tokio::spawn(async move {
            ids.export_public_identity(number).await.map(|_| ryder_core::AppKeyExport::Rejected)
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Every app key command must be directly followed by its domain input.
    let log = fake.log();
    for (i, command) in log.iter().enumerate() {
        if command.first() == Some(&opcode::EXPORT_OWNER_APP_KEY_PRIVATE_KEY) {
            assert_eq!(log[i + 1], b"app.example.com\0".to_vec(), "log: {log:?}");
        }
    }
    assert_eq!(log.len(), 1 + 4 * 2 + 4);
}

#[tokio::test]
async fn sequence_holds_channel_until_done() {
    let fake = FakeRyder::new();
    let session = session(&fake);
    session.open().await.unwrap();

    let replies = session
        .sequence(|mut seq| async move {
            let first = seq.send(&Command::with_arg(opcode::EXPORT_PUBLIC_IDENTITY, 7)).await?;
            let second = seq.send(&Command::with_arg(opcode::EXPORT_PUBLIC_IDENTITY, 8)).await?;
            Ok((first, second))
        })
        .await
        .unwrap();

    assert_eq!(replies.0, Response::Output(b"1RyderIdentity7".to_vec()));
    assert_eq!(replies.1, Response::Output(b"1RyderIdentity8".to_vec()));
}

// ── Close & reconnect ───────────────────────────────────────────────

#[tokio::test]
async fn close_is_idempotent() {
    let fake = FakeRyder::new();
    let session = session(&fake);
    session.open().await.unwrap();

    session.close().await;
    session.close().await;
    assert_eq!(fake.closes(), 1);
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_reconnects_after_delay() {
    let fake = FakeRyder::new();
    let session = session(&fake);
    session.open().await.unwrap();

    fake.drop_next_exchange();
    let err = session.export_public_identity(0).await.unwrap_err();
    assert!(err.is_transient(), "expected transport error, got: {err:?}");
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    // A second failure while a reconnect is pending does not schedule another.
    let err = session.export_public_identity(0).await.unwrap_err();
    assert!(matches!(err, CoreError::NotConnected));
    session.schedule_reconnect();

    tokio::time::sleep(Duration::from_millis(1_900)).await;
    assert_eq!(fake.connects(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fake.connects(), 2);
    assert_eq!(session.state(), ConnectionState::Open);
    assert_eq!(session.export_public_identity(3).await.unwrap().number, 3);
}

#[tokio::test(start_paused = true)]
async fn failed_reconnect_retries_with_same_delay() {
    let fake = FakeRyder::new();
    let session = session(&fake);
    session.open().await.unwrap();

    fake.fail_connects(2);
    fake.drop_next_exchange();
    session.export_public_identity(0).await.unwrap_err();

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(fake.connects(), 2);
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fake.connects(), 3);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fake.connects(), 4);
    assert_eq!(session.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_reconnect() {
    let fake = FakeRyder::new();
    let session = session(&fake);
    session.open().await.unwrap();

    fake.drop_next_exchange();
    session.export_public_identity(0).await.unwrap_err();
    session.shutdown().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fake.connects(), 1);
    assert_eq!(session.state(), ConnectionState::Closed);
}
