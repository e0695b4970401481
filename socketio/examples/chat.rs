use std::time::Duration;
use unisock::{ClientBuilder, Value};

#[tokio::main]
async fn main() {
    // listeners get the event's arguments as well as a handle to the client
    let client = ClientBuilder::new("http://localhost:4200/")
        .on("message", |args: Vec<Value>, client| async move {
            println!("Received: {:?}", args);
            client
                .emit("test", vec![Value::from("got it")])
                .expect("client was dropped");
        })
        .on("error", |err, _| async move { eprintln!("Error: {:?}", err) })
        .on("reconnect_attempt", |attempt, _| async move {
            println!("reconnection attempt {:?} failed", attempt)
        })
        .reconnect_delay(Duration::from_millis(500), Duration::from_secs(5))
        .max_reconnect_attempts(10)
        .connect()
        .await
        .expect("Connection failed");

    // emit to the "foo" event
    client
        .emit("foo", vec![Value::from(serde_json::json!({"token": 123}))])
        .expect("client was dropped");

    // define a callback, that's executed when the ack got acked
    client
        .emit_with_ack(
            "test",
            vec![Value::from(serde_json::json!({"myAckData": 123}))],
            Duration::from_secs(2),
            |result, _| async move {
                match result {
                    Ok(args) => println!("Ack data: {:?}", args),
                    Err(err) => eprintln!("Ack failed: {}", err),
                }
            },
        )
        .expect("client was dropped");

    tokio::time::sleep(Duration::from_secs(2)).await;
    client.disconnect().await.expect("Disconnect failed");
}
