use analyst::host::Host;
use anyhow::Result;

use crate::prompt::{InputType, RustylinePrompt};

/// Answer a single question and print it to stdout
pub async fn single_shot(host: &Host, query: &str) -> Result<()> {
    let answer = host.process_query(query).await?;
    println!("{}", answer);
    Ok(())
}

/// Read questions until the user exits. A failed question is reported and the loop
/// continues.
pub async fn interactive(host: &Host) -> Result<()> {
    let mut prompt = RustylinePrompt::new();
    prompt.banner();

    loop {
        let input = prompt.get_input()?;
        let query = match input.input_type {
            InputType::Exit => break,
            InputType::AskAgain => continue,
            InputType::Message => match input.content {
                Some(query) => query,
                None => continue,
            },
        };

        prompt.show_busy();
        let result = host.process_query(&query).await;
        prompt.hide_busy();

        match result {
            Ok(answer) => prompt.render(&answer),
            Err(e) => {
                tracing::error!("Query failed: {}", e);
                prompt.render_error(&e.to_string());
            }
        }
    }

    prompt.goodbye();
    Ok(())
}
