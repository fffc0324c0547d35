use relaymq::{
    model::PERSISTENT, Arguments, BasicProperties, BrokerConfig, ExchangeType, RelaymqError,
    VirtualHost,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

fn config_for(dir: &tempfile::TempDir) -> BrokerConfig {
    BrokerConfig::default().with_data_dir(dir.path().to_string_lossy())
}

fn persistent() -> Option<BasicProperties> {
    Some(BasicProperties {
        delivery_mode: PERSISTENT,
        ..Default::default()
    })
}

/// Declares durable queue `q` holding the given persistent bodies, returning its log path
fn durable_queue_with(config: &BrokerConfig, bodies: &[&[u8]]) -> PathBuf {
    let vhost = VirtualHost::open(config).unwrap();
    vhost
        .queue_declare("q", true, false, false, Arguments::new())
        .unwrap();
    for body in bodies {
        vhost
            .basic_publish("", "q", persistent(), body.to_vec())
            .unwrap();
    }
    vhost
        .disk()
        .messages()
        .queue_dir(&vhost.qualify("q"))
        .join("queue_data.txt")
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&dir);
    config.worker_threads = 0;
    assert!(matches!(
        VirtualHost::open(&config),
        Err(RelaymqError::Config(_))
    ));

    let mut config = config_for(&dir);
    config.compact_valid_ratio = 1.5;
    assert!(matches!(
        VirtualHost::open(&config),
        Err(RelaymqError::Config(_))
    ));

    let config = config_for(&dir).with_virtual_host("");
    assert!(matches!(
        VirtualHost::open(&config),
        Err(RelaymqError::Config(_))
    ));
}

#[test]
fn test_data_dir_that_is_a_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    fs::write(&file, b"x").unwrap();
    let config = BrokerConfig::default().with_data_dir(file.to_string_lossy());
    assert!(VirtualHost::open(&config).is_err());
}

#[test]
fn test_ack_of_unknown_queue_or_message_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let vhost = VirtualHost::open(&config_for(&dir)).unwrap();
    vhost
        .queue_declare("q", false, false, false, Arguments::new())
        .unwrap();

    assert!(!vhost.basic_ack("missing", "M-1").unwrap());
    assert!(!vhost.basic_ack("q", "M-does-not-exist").unwrap());
    assert_eq!(vhost.metrics().snapshot().acks, 0);
}

#[test]
fn test_ack_must_name_the_queue_holding_the_delivered_message() {
    let dir = tempfile::tempdir().unwrap();
    let vhost = VirtualHost::open(&config_for(&dir)).unwrap();
    for q in ["a", "b"] {
        vhost
            .queue_declare(q, true, false, false, Arguments::new())
            .unwrap();
    }
    vhost
        .basic_publish("", "b", persistent(), b"for-b".to_vec())
        .unwrap();
    let queue_b = vhost.qualify("b");
    let message = vhost.index().poll_message(&queue_b).unwrap();

    // Not delivered yet
    assert!(!vhost.basic_ack("b", message.id()).unwrap());

    vhost.index().add_unacked(&queue_b, Arc::clone(&message));
    assert!(!vhost.basic_ack("a", message.id()).unwrap());
    assert_eq!(vhost.index().unacked_len(&queue_b), 1);
    assert_eq!(vhost.disk().messages().read_stat(&queue_b).unwrap().valid_count, 1);

    assert!(vhost.basic_ack("b", message.id()).unwrap());
    assert_eq!(vhost.index().unacked_len(&queue_b), 0);
    assert!(vhost.disk().load_messages(&queue_b).unwrap().is_empty());
    assert_eq!(vhost.metrics().snapshot().acks, 1);
}

#[test]
fn test_queue_names_that_escape_the_data_dir_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);
    let vhost = VirtualHost::open(&config).unwrap();
    vhost
        .queue_declare("keep", true, false, false, Arguments::new())
        .unwrap();
    vhost
        .basic_publish("", "keep", persistent(), b"safe".to_vec())
        .unwrap();

    for name in ["/..", "/../x", "/.", "/x/y"] {
        assert!(!vhost
            .queue_declare(name, true, false, false, Arguments::new())
            .unwrap());
        assert!(!vhost.queue_delete(name).unwrap());
        assert!(vhost.index().get_queue(&vhost.qualify(name)).is_none());
    }

    assert!(dir.path().join("meta.db").exists());
    let keep = vhost.qualify("keep");
    assert!(vhost.disk().messages().files_exist(&keep));
    assert_eq!(vhost.disk().select_all_queues().unwrap().len(), 1);
    drop(vhost);

    let vhost = VirtualHost::open(&config).unwrap();
    assert_eq!(vhost.index().backlog_len(&keep), 1);
}

#[test]
fn test_operations_on_missing_entities_fail_softly() {
    let dir = tempfile::tempdir().unwrap();
    let vhost = VirtualHost::open(&config_for(&dir)).unwrap();
    assert!(!vhost.exchange_delete("nope").unwrap());
    assert!(!vhost.queue_delete("nope").unwrap());
    assert!(!vhost.queue_unbind("nope", "nope").unwrap());
    assert!(!vhost.basic_cancel("nope", "tag").unwrap());
    assert_eq!(vhost.cancel_consumer_tag("tag"), 0);
}

#[test]
fn test_corrupted_record_fails_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);
    let log_path = durable_queue_with(&config, &[b"first", b"second"]);

    // Flip the last body byte of the second record
    let mut data = fs::read(&log_path).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0xff;
    fs::write(&log_path, data).unwrap();

    assert!(matches!(
        VirtualHost::open(&config),
        Err(RelaymqError::Corruption(_))
    ));
}

#[test]
fn test_truncated_tail_is_ignored_on_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);
    let log_path = durable_queue_with(&config, &[b"kept"]);

    // A crash mid-append leaves a length prefix promising more bytes than exist
    let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(&[0, 0, 0, 64, 1, 2, 3]).unwrap();
    drop(file);

    let vhost = VirtualHost::open(&config).unwrap();
    let queue = vhost.qualify("q");
    assert_eq!(vhost.index().backlog_len(&queue), 1);
    let message = vhost.index().poll_message(&queue).unwrap();
    assert_eq!(message.body.as_ref(), b"kept");
}

#[test]
fn test_missing_queue_files_are_recreated_on_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);
    let log_path = durable_queue_with(&config, &[b"lost"]);
    let queue_dir = log_path.parent().unwrap().to_path_buf();
    fs::remove_dir_all(&queue_dir).unwrap();

    let vhost = VirtualHost::open(&config).unwrap();
    let queue = vhost.qualify("q");
    assert!(vhost.index().get_queue(&queue).is_some());
    assert_eq!(vhost.index().backlog_len(&queue), 0);
    assert!(vhost.disk().messages().files_exist(&queue));

    // The queue keeps working after the files come back
    assert!(vhost
        .basic_publish("", "q", persistent(), b"new".to_vec())
        .unwrap());
    assert_eq!(vhost.disk().load_messages(&queue).unwrap().len(), 1);
}

#[test]
fn test_durable_binding_with_deleted_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir);
    {
        let vhost = VirtualHost::open(&config).unwrap();
        vhost
            .exchange_declare("ex", ExchangeType::Fanout, true, false, Arguments::new())
            .unwrap();
        vhost
            .queue_declare("q", true, false, false, Arguments::new())
            .unwrap();
        vhost.queue_bind("q", "ex", "").unwrap();
        vhost.queue_delete("q").unwrap();
    }

    let vhost = VirtualHost::open(&config).unwrap();
    assert!(vhost.index().get_queue(&vhost.qualify("q")).is_none());
    // Routing over the dangling binding must not fail
    assert!(vhost.basic_publish("ex", "k", None, b"x".to_vec()).unwrap());
}
