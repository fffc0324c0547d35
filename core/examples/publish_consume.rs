//! In-process publish/consume example
//!
//! Declares a topic exchange and a queue, subscribes with auto-ack and publishes a few
//! messages. Only keys matching the binding reach the consumer.

use relaymq::{Arguments, BasicProperties, BrokerConfig, Consumer, ExchangeType, VirtualHost};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BrokerConfig::default().with_data_dir("./relaymq-example-data");
    let vhost = VirtualHost::open(&config)?;

    vhost.exchange_declare("orders", ExchangeType::Topic, false, false, Arguments::new())?;
    vhost.queue_declare("eu-orders", false, false, false, Arguments::new())?;
    vhost.queue_bind("eu-orders", "orders", "order.eu.#")?;

    let (tx, rx) = mpsc::channel();
    let consumer: Arc<dyn Consumer> = Arc::new(
        move |tag: &str, props: &BasicProperties, body: &[u8]| -> relaymq::Result<()> {
            println!(
                "[{}] {} {} => {}",
                tag,
                props.message_id,
                props.routing_key,
                String::from_utf8_lossy(body)
            );
            let _ = tx.send(());
            Ok(())
        },
    );
    vhost.basic_consume("example-consumer", "eu-orders", true, consumer)?;

    let keys = ["order.eu.created", "order.us.created", "order.eu.de.shipped"];
    for key in keys {
        vhost.basic_publish("orders", key, None, format!("payload for {}", key).into_bytes())?;
    }

    // Two of the three keys match the binding
    for _ in 0..2 {
        rx.recv_timeout(Duration::from_secs(5))?;
    }
    println!("Published {} messages", vhost.metrics().snapshot().messages_published);
    Ok(())
}
