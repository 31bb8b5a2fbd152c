use dotenvy::dotenv;

mod common;

#[tokio::main]
async fn main() {
    dotenv().ok();
    common::init_tracing();

    let client = common::get_client();
    common::ensure_signed_in(&client).await;

    let chats = client.list_chats().await.unwrap();
    for chat in &chats {
        println!(
            "#{} {}{}",
            chat.id,
            chat.title.as_deref().unwrap_or("(untitled)"),
            if chat.archived { " [archived]" } else { "" }
        );
    }

    if let Some(chat) = chats.first() {
        client.load_history(chat.id).await.unwrap();
        for message in client.ledger().messages(chat.id) {
            println!("{:?}: {}", message.sender, message.text);
        }
    }
}
