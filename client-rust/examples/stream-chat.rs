use dotenvy::dotenv;
use rag_chat_client::LedgerEventKind;
use std::io::Write;

mod common;

#[tokio::main]
async fn main() {
    dotenv().ok();
    common::init_tracing();

    let client = common::get_client();
    common::ensure_signed_in(&client).await;

    let mut events = client.ledger().subscribe();
    let printer = async {
        let mut printed = 0;
        while let Ok(event) = events.recv().await {
            match event.kind {
                LedgerEventKind::TextAppended => {
                    let messages = client.ledger().messages(event.conversation_id);
                    let text = messages.last().map(|m| m.text.as_str()).unwrap_or_default();
                    print!("{}", &text[printed..]);
                    std::io::stdout().flush().unwrap();
                    printed = text.len();
                }
                LedgerEventKind::StreamingStopped => break,
                _ => {}
            }
        }
        println!();
    };

    let (started, ()) = tokio::join!(
        client.start_conversation("How do I reset the device to factory settings?", None),
        printer
    );
    let (id, result) = started.unwrap();
    result.unwrap();

    let messages = client.ledger().messages(id);
    if let Some(sources) = messages.last().and_then(|m| m.sources.as_ref()) {
        for source in sources {
            println!("- {} (p. {}): {}", source.file_name, source.page_number, source.snippet);
        }
    }
}
