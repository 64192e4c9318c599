//! Concurrency tests for reply correlation and session-wide state

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{completed, test_config, MockConfig, MockServer, PASSWORD};
use nxcp::core::codec::{decode, encode_with};
use nxcp::core::message::Message;
use nxcp::error::ProtocolError;
use nxcp::protocol::codes::{cmd, rcc, vid};
use nxcp::protocol::wait_queue::WaitQueue;
use nxcp::Session;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const ECHO: u16 = 0x0400;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_waiters_each_get_their_reply() {
    let queue = Arc::new(WaitQueue::new(Duration::from_secs(10)));
    let mut waiters = Vec::new();

    for id in 0..200u32 {
        let queue = Arc::clone(&queue);
        waiters.push(tokio::spawn(async move {
            queue.wait(cmd::REQUEST_COMPLETED, id, Duration::from_secs(5)).await
        }));
    }

    let producers: Vec<_> = (0..4u32)
        .map(|lane| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for id in (lane..200).step_by(4) {
                    queue.put(completed(id, id * 3));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for producer in producers {
        producer.await.unwrap();
    }

    for (id, waiter) in waiters.into_iter().enumerate() {
        let msg = waiter.await.unwrap().expect("reply delivered");
        assert_eq!(msg.id(), id as u32);
        assert_eq!(msg.get_u32(vid::RCC), Some(id as u32 * 3));
    }
    assert_eq!(queue.waiter_count(), 0);
    assert_eq!(queue.retained_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_during_waits() {
    let queue = Arc::new(WaitQueue::new(Duration::from_secs(10)));
    let waiters: Vec<_> = (0..50u32)
        .map(|id| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.wait(cmd::REQUEST_COMPLETED, id, Duration::from_secs(10)).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter released")
            .unwrap();
        assert!(matches!(result, Err(ProtocolError::ConnectionBroken)));
    }

    queue.put(completed(1, rcc::SUCCESS));
    assert_eq!(queue.retained_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_key_waiters_served_in_order() {
    let queue = Arc::new(WaitQueue::new(Duration::from_secs(10)));
    let first = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.wait(cmd::REQUEST_COMPLETED, 7, Duration::from_secs(5)).await })
    };
    while queue.waiter_count() < 1 {
        tokio::task::yield_now().await;
    }
    let second = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.wait(cmd::REQUEST_COMPLETED, 7, Duration::from_secs(5)).await })
    };
    while queue.waiter_count() < 2 {
        tokio::task::yield_now().await;
    }

    queue.put(completed(7, 1));
    queue.put(completed(7, 2));

    assert_eq!(first.await.unwrap().unwrap().get_u32(vid::RCC), Some(1));
    assert_eq!(second.await.unwrap().unwrap().get_u32(vid::RCC), Some(2));
}

#[test]
fn test_parallel_encoding() {
    let handles: Vec<_> = (0..8u32)
        .map(|t| {
            std::thread::spawn(move || {
                for i in 0..200u32 {
                    let msg = Message::new(ECHO, t * 1000 + i)
                        .with(1, format!("thread {t} message {i}"))
                        .with(2, vec![t as u8; (i as usize) * 7]);
                    let wire = encode_with(&msg, i % 2 == 0);
                    assert_eq!(decode(&wire).unwrap(), msg);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("encoder thread");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_over_one_session() {
    let echo: common::Handler = Arc::new(|msg: &Message| {
        vec![completed(msg.id(), rcc::SUCCESS).with(1, msg.get_u32(1).unwrap_or(0))]
    });
    let server = MockServer::start(MockConfig {
        handler: Some(echo),
        ..MockConfig::default()
    })
    .await;

    let session = Arc::new(Session::new(test_config()));
    session.connect(server.options(PASSWORD)).await.unwrap();

    let tasks: Vec<_> = (0..64u32)
        .map(|n| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let id = session.create_message_id();
                session
                    .send_message(&Message::new(ECHO, id).with(1, n))
                    .await?;
                let reply = session.wait_for_result(id, Duration::from_secs(5)).await?;
                Ok::<_, ProtocolError>((id, n, reply.get_u32(1)))
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        let (id, n, echoed) = task.await.unwrap().expect("request succeeded");
        assert_eq!(echoed, Some(n));
        assert!(ids.insert(id), "duplicate id {id}");
    }

    // Frames from concurrent senders never interleave on the wire.
    let echoes = server
        .received()
        .into_iter()
        .filter(|m| m.opcode() == ECHO)
        .count();
    assert_eq!(echoes, 64);

    session.disconnect().await;
}
