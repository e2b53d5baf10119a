//! Reply to an activity through a local channel stand-in.
//!
//! Starts a WebSocket listener on loopback that acknowledges every reply by
//! echoing an activity with `replyToId` set, then runs one client against it.
//!
//! ```text
//! cargo run --example reply
//! ```

use std::time::Duration;

use activitywire::codec::ActivityCodec;
use activitywire::schema::ConversationAccount;
use activitywire::{Activity, ConnectorClient, Conversations};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn channel(listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (tcp, _) = listener.accept().await?;
    let mut socket = tokio_tungstenite::accept_async(tcp).await?;
    let codec = ActivityCodec::default();

    while let Some(msg) = socket.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply: Activity = codec.decode_value(text.as_bytes())?;
        println!("channel <- {}", text);

        let mut ack = Activity::new("message");
        ack.id = Some(format!("srv-{}", reply.reply_to_id.as_deref().unwrap_or("?")));
        ack.conversation = reply.conversation.clone().or_else(|| Some(ConversationAccount::new("?")));
        ack.reply_to_id = reply.reply_to_id.clone();
        ack.text = Some("received".to_string());

        let bytes = codec.encode(&ack)?;
        socket.send(Message::Text(String::from_utf8(bytes.to_vec())?)).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("ws://{}/v3/socket", listener.local_addr()?);
    let server = tokio::spawn(channel(listener));

    let client = ConnectorClient::builder()
        .endpoint(endpoint)
        .bearer_token("demo-token")
        .await_acknowledgements(Duration::from_secs(5))
        .build()?;

    let response = client
        .reply_to_activity("conv1", "act1", Activity::message("hello"))
        .await?;

    println!("status   {}", response.status);
    println!("request  {} {}", response.request.method, response.request.path);
    println!("body     {}", response.request.body_text().unwrap_or_default());
    println!("assigned {:?}", response.body.id);

    client.close().await?;
    server.await??;
    Ok(())
}
