//! End-to-end delivery tests: compose, persist, send, retry.

mod common;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use common::{ConfigBuilder, TestHarness};
use postman::db::message_repo::MessageFilter;
use postman::{DelaySpec, DeliveryPhase, ErrorKind, Field, Message, Placeholders, QueueMode};

fn addressed(subject: &str, text: &str, html: &str) -> Message {
    let mut msg = Message::new(subject, text, html);
    msg.add_to("buyer@example.com", Some("Buyer"));
    msg
}

/// Polls `condition` until it holds or five seconds pass.
fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    condition()
}

#[test]
fn test_sent_and_error_are_exclusive() {
    let harness = TestHarness::new();

    harness.transport.set_failing(true);
    let mut msg = addressed("Receipt", "Thanks", "");
    assert!(!harness.postman.send_immediately(&mut msg).unwrap());

    let stored = harness.postman.find_message(msg.id.unwrap()).unwrap().unwrap();
    assert!(stored.error.is_some());
    assert!(stored.sent_at.is_none());
    assert!(stored.executed_at.is_some());

    harness.transport.set_failing(false);
    assert!(harness.postman.send_immediately(&mut msg).unwrap());

    let stored = harness.postman.find_message(msg.id.unwrap()).unwrap().unwrap();
    assert!(stored.error.is_none());
    assert!(stored.sent_at.is_some());
    assert_eq!(harness.transport.attempts(), 2);
}

#[test]
fn test_codes_are_unique() {
    let harness = TestHarness::new();
    let mut codes = HashSet::new();

    for i in 0..50 {
        let mut msg = harness
            .postman
            .compose(&format!("Message {i}"), "", "", &Placeholders::new(), "", false, None)
            .unwrap();
        msg.save(harness.postman.database()).unwrap();
        assert_eq!(msg.code().len(), 32);
        assert!(msg.code().chars().all(|c| c.is_ascii_hexdigit()));
        codes.insert(msg.code().to_string());
    }

    assert_eq!(codes.len(), 50);
}

#[test]
fn test_recipients_reach_transport() {
    let harness = TestHarness::new();
    let mut msg = Message::new("Team", "hello", "");
    msg.add_to("a@example.com", Some("First"))
        .add_cc("c@example.com", None)
        .add_to("b@example.com", None)
        .add_to("a@example.com", Some("Second"))
        .add_bcc("audit@example.com", None)
        .add_reply_to("support@example.com", Some("Support"));

    assert!(harness.postman.send_immediately(&mut msg).unwrap());

    let mail = &harness.transport.sent()[0];
    let to: Vec<_> = mail.to.iter().collect();
    assert_eq!(
        to,
        vec![("a@example.com", Some("Second")), ("b@example.com", None)]
    );
    assert_eq!(mail.cc.len(), 1);
    assert_eq!(mail.bcc.len(), 1);
    assert_eq!(mail.reply_to.get("support@example.com"), Some(&Some("Support".to_string())));
}

#[test]
fn test_empty_address_never_reaches_transport() {
    let harness = TestHarness::new();

    let mut nobody = Message::new("Nobody", "x", "");
    assert!(!harness.postman.send_immediately(&mut nobody).unwrap());
    assert!(nobody.has_error_kind(ErrorKind::NoRecipients));

    let mut reply_only = Message::new("Reply only", "x", "");
    reply_only.add_reply_to("r@example.com", None);
    assert!(!harness.postman.send_immediately(&mut reply_only).unwrap());

    let mut broken = Message::new("Broken", "x", "");
    broken.set_address_raw(Some("{not json".to_string()));
    assert!(!harness.postman.send_immediately(&mut broken).unwrap());
    assert!(broken
        .errors()
        .iter()
        .any(|e| e.field == Field::Address && e.kind == ErrorKind::ValidationFailed));

    assert_eq!(harness.transport.attempts(), 0);
    for id in [nobody.id, reply_only.id, broken.id] {
        let stored = harness.postman.find_message(id.unwrap()).unwrap().unwrap();
        assert!(stored.error.is_some());
        assert!(stored.sent_at.is_none());
    }
}

#[test]
fn test_minimal_payload() {
    let harness = TestHarness::new();
    let mut msg = Message::new("Ping", "", "");
    msg.add_to("x@example.com", None);

    assert!(harness.postman.send_immediately(&mut msg).unwrap());

    let mail = &harness.transport.sent()[0];
    assert_eq!(mail.charset, "UTF-8");
    assert_eq!(mail.subject, "Ping");
    assert_eq!(mail.from.email, "postman@localhost");
    assert_eq!(mail.from.name.as_deref(), Some("Postman"));
    assert!(mail.text.is_empty());
    assert!(mail.html.is_empty());
    assert!(mail.reply_to.is_empty());
    assert!(mail.cc.is_empty());
    assert!(mail.inline.is_empty());
    assert!(mail.attachments.is_empty());
}

#[test]
fn test_embeds_are_deduplicated() {
    let harness = TestHarness::new();
    let logo = harness.write_file("media/logo.png", b"\x89PNG fake");
    let invoice = harness.write_file("media/invoice.pdf", b"%PDF-1.4");

    let pixel = "data:image/gif;base64,R0lGODlhAQABAAAAACw=";
    let html = format!(
        "<img src=\"#embed[logo]#\"><img src=\"#embed%5Blogo%5D#\">\
         <img src=\"{pixel}\"><img src=\"{pixel}\">"
    );
    let mut msg = addressed("Invoice", "see attachment", &html);
    msg.save(harness.postman.database()).unwrap();
    let id = msg.id.unwrap();

    harness.postman.attach_file(id, &logo, Some("logo")).unwrap();
    harness.postman.attach_file(id, &logo, Some("logo")).unwrap();
    harness.postman.attach_file(id, &invoice, None).unwrap();
    harness
        .postman
        .attach_file(id, &harness.path().join("media/gone.png"), None)
        .unwrap();

    assert!(harness.postman.send_by_id(id).unwrap());

    let mail = &harness.transport.sent()[0];
    assert_eq!(mail.inline.len(), 2);
    assert_eq!(mail.attachments.len(), 1);
    assert_eq!(mail.attachments[0].file_name, "invoice.pdf");
    assert_eq!(mail.attachments[0].content_type, "application/pdf");

    assert!(!mail.html.contains("#embed"));
    assert!(!mail.html.contains("data:"));

    let logo_part = mail
        .inline
        .iter()
        .find(|r| r.content_type == "image/png")
        .unwrap();
    let reference = format!("cid:{}", logo_part.content_id);
    assert_eq!(mail.html.matches(&reference).count(), 2);

    let pixel_part = mail
        .inline
        .iter()
        .find(|r| r.content_type == "image/gif")
        .unwrap();
    let reference = format!("cid:{}", pixel_part.content_id);
    assert_eq!(mail.html.matches(&reference).count(), 2);
}

#[test]
fn test_web_version_link_opens_message() {
    let harness = TestHarness::with_config(
        ConfigBuilder::new()
            .host("https://shop.example.com")
            .web_version_secret("letter-key")
            .build(),
    );
    let mut msg = addressed("News", "Read online: #web_version#", "");
    assert!(harness.postman.send_immediately(&mut msg).unwrap());

    let text = &harness.transport.sent()[0].text;
    let link = text.trim_start_matches("Read online: ");
    let url = url::Url::parse(link).unwrap();
    assert_eq!(url.path(), "/letter/show");

    let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(query["token"], msg.code());

    let opened = harness
        .postman
        .open_web_version(&query["token"], &query["hash"])
        .unwrap()
        .unwrap();
    assert_eq!(opened.id, msg.id);

    assert!(harness
        .postman
        .open_web_version("someone-else", &query["hash"])
        .unwrap()
        .is_none());
}

#[test]
fn test_retry_chain_is_bounded() {
    let harness = TestHarness::new();
    harness.transport.set_failing(true);

    let mut root = addressed("Flaky", "x", "");
    assert!(!harness.postman.send_immediately(&mut root).unwrap());
    let root_id = root.id.unwrap();

    // The send failure stays on the caller, so each call reports false
    // while the chain still grows.
    assert!(root.has_error_kind(ErrorKind::FailedToSend));
    assert!(!harness.postman.repeat_after(&mut root, 3, DelaySpec::now()).unwrap());
    assert!(!harness
        .postman
        .repeat_after(&mut root, 3, "+1 minute".parse().unwrap())
        .unwrap());
    assert!(!root.has_error_kind(ErrorKind::RetryLimitExceeded));
    assert!(!harness.postman.repeat_after(&mut root, 3, DelaySpec::now()).unwrap());
    assert!(root.has_error_kind(ErrorKind::RetryLimitExceeded));

    let chain = MessageFilter {
        try_message_id: Some(root_id),
        ..Default::default()
    };
    let (members, total) = harness.postman.list_messages(&chain).unwrap();
    assert_eq!(total, 3);
    assert!(members
        .iter()
        .filter(|m| m.id != Some(root_id))
        .all(|m| m.try_message_id == Some(root_id)));

    // Deleting a retry frees a slot in the chain.
    let retry_id = members.iter().find(|m| m.id != Some(root_id)).unwrap().id.unwrap();
    assert!(harness.postman.delete_message(retry_id).unwrap());
    let mut root = harness.postman.find_message(root_id).unwrap().unwrap();
    assert!(harness.postman.repeat_after(&mut root, 3, DelaySpec::now()).unwrap());
}

#[test]
fn test_retry_with_configured_backoff() {
    let harness = TestHarness::with_config(ConfigBuilder::new().retry(4, 120, 600).build());
    let mut msg = addressed("Later", "x", "");
    msg.save(harness.postman.database()).unwrap();

    assert!(harness.postman.repeat(&mut msg).unwrap());

    let chain = MessageFilter {
        try_message_id: msg.id,
        ..Default::default()
    };
    let (members, _) = harness.postman.list_messages(&chain).unwrap();
    let retry = members.iter().find(|m| m.id != msg.id).unwrap();
    let delay = retry.scheduled_at.unwrap() - retry.created_at().unwrap();
    assert_eq!(delay, 120);
}

#[test]
fn test_search_and_soft_delete() {
    let harness = TestHarness::new();
    for subject in ["Invoice 100", "Newsletter", "Invoice 101"] {
        let mut msg = addressed(subject, "", "");
        msg.save(harness.postman.database()).unwrap();
    }

    let search = MessageFilter {
        search: Some("invoice".to_string()),
        ..Default::default()
    };
    let (found, total) = harness.postman.list_messages(&search).unwrap();
    assert_eq!(total, 2);
    assert_eq!(found[0].subject, "Invoice 101");

    assert!(harness.postman.delete_message(found[0].id.unwrap()).unwrap());
    let (_, total) = harness.postman.list_messages(&search).unwrap();
    assert_eq!(total, 1);

    let with_deleted = MessageFilter {
        include_deleted: true,
        ..search
    };
    let (_, total) = harness.postman.list_messages(&with_deleted).unwrap();
    assert_eq!(total, 2);
}

#[test]
fn test_events_for_queued_delivery() {
    let harness = TestHarness::new();
    let mut events = harness.postman.subscribe();

    let mut msg = addressed("Evented", "x", "");
    assert!(harness.postman.send_to_queue(&mut msg).unwrap());

    let phases: Vec<DeliveryPhase> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.phase)
        .collect();
    assert_eq!(
        phases,
        vec![DeliveryPhase::Queued, DeliveryPhase::Executing, DeliveryPhase::Sent]
    );
}

#[test]
fn test_worker_queue_delivers_in_background() {
    let harness = TestHarness::with_mode(ConfigBuilder::new().build(), QueueMode::Workers);

    let mut ids = Vec::new();
    for i in 0..5 {
        let mut msg = addressed(&format!("Bulk {i}"), "x", "");
        assert!(harness.postman.send_to_queue(&mut msg).unwrap());
        ids.push(msg.id.unwrap());
    }

    assert!(wait_for(|| harness.transport.sent().len() == 5));
    for id in ids {
        assert!(wait_for(|| {
            harness
                .postman
                .find_message(id)
                .unwrap()
                .is_some_and(|m| m.is_sent())
        }));
    }

    harness.finish();
}

#[test]
fn test_worker_queue_retries_failures() {
    let harness = TestHarness::with_mode(
        ConfigBuilder::new().retry(2, 0, 0).build(),
        QueueMode::WorkersWithRetry,
    );
    harness.transport.set_failing(true);

    let mut msg = addressed("Retry me", "x", "");
    assert!(harness.postman.send_to_queue(&mut msg).unwrap());

    assert!(wait_for(|| harness.transport.attempts() == 2));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(harness.transport.attempts(), 2);

    let chain = MessageFilter {
        try_message_id: msg.id,
        ..Default::default()
    };
    assert!(wait_for(|| {
        let (members, total) = harness.postman.list_messages(&chain).unwrap();
        total == 2 && members.iter().all(|m| m.error.is_some())
    }));

    harness.finish();
}
