//! Interactive shopping session
//!
//! Lines starting with `/` are structured cart commands; anything else is
//! sent as free text.

use crate::app::App;
use anyhow::Result;
use cartwise_core::{CartCommand, ResponseEnvelope, ShoppingRequest};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  /add <sku> [qty]   add to cart (default 1)
  /remove <sku>      remove from cart
  /set <sku> <qty>   set quantity (0 removes)
  /cart              show cart
  /confirm           place the order
  /json              toggle raw JSON output
  /quit              exit
Anything else is sent as a message.";

/// One parsed input line.
#[derive(Debug, PartialEq)]
pub enum ReplInput {
    Text(String),
    Command(CartCommand),
    ToggleJson,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

/// Parse a line typed at the prompt.
pub fn parse_line(line: &str) -> ReplInput {
    let line = line.trim();
    if line.is_empty() {
        return ReplInput::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ReplInput::Text(line.to_string());
    };

    let mut parts = rest.split_whitespace();
    let verb = parts.next().unwrap_or_default().to_lowercase();
    let args: Vec<&str> = parts.collect();

    match (verb.as_str(), args.as_slice()) {
        ("add", [item]) => ReplInput::Command(CartCommand::Add {
            item: (*item).to_string(),
            quantity: 1,
        }),
        ("add", [item, qty]) => match qty.parse() {
            Ok(quantity) => ReplInput::Command(CartCommand::Add {
                item: (*item).to_string(),
                quantity,
            }),
            Err(_) => ReplInput::Invalid(format!("not a quantity: {qty}")),
        },
        ("remove", [item]) => ReplInput::Command(CartCommand::Remove {
            item: (*item).to_string(),
        }),
        ("set", [item, qty]) => match qty.parse() {
            Ok(quantity) => ReplInput::Command(CartCommand::SetQuantity {
                item: (*item).to_string(),
                quantity,
            }),
            Err(_) => ReplInput::Invalid(format!("not a quantity: {qty}")),
        },
        ("cart", []) => ReplInput::Command(CartCommand::View),
        ("confirm", []) => ReplInput::Command(CartCommand::Confirm),
        ("json", []) => ReplInput::ToggleJson,
        ("help", _) => ReplInput::Help,
        ("quit" | "exit", _) => ReplInput::Quit,
        _ => ReplInput::Invalid(format!("unknown command: /{rest}")),
    }
}

/// Short human-readable rendering of an envelope.
pub fn render(envelope: &ResponseEnvelope) -> String {
    let mut out = String::new();
    if let Some(text) = envelope.data.summary.as_ref().or(envelope.data.message.as_ref()) {
        out.push_str(text);
        out.push('\n');
    }
    for (rank, item) in envelope.data.candidates.iter().take(10).enumerate() {
        out.push_str(&format!(
            "{:>2}. {} [{}] {:.3}",
            rank + 1,
            item.candidate.name,
            item.candidate.id,
            item.final_score
        ));
        if let Some(boost) = item.boosts.first() {
            out.push_str(&format!("  ({})", boost.explanation));
        }
        out.push('\n');
    }
    if !envelope.data.filtered.is_empty() {
        out.push_str(&format!(
            "{} item(s) hidden for dietary restrictions\n",
            envelope.data.filtered.len()
        ));
    }
    if let Some(code) = &envelope.meta.error_code {
        out.push_str(&format!("[degraded: {code}]\n"));
    }
    out
}

/// Read lines from stdin until EOF or `/quit`.
pub async fn run(app: &App, user: &str, session: &str) -> Result<()> {
    println!("Cartwise session {session} for {user}. Type /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut raw_json = false;

    while let Some(line) = lines.next_line().await? {
        let request = match parse_line(&line) {
            ReplInput::Text(text) => ShoppingRequest::text(user, session, text),
            ReplInput::Command(command) => ShoppingRequest::command(user, session, command),
            ReplInput::ToggleJson => {
                raw_json = !raw_json;
                continue;
            }
            ReplInput::Help => {
                println!("{HELP}");
                continue;
            }
            ReplInput::Quit => break,
            ReplInput::Empty => continue,
            ReplInput::Invalid(reason) => {
                println!("{reason}");
                continue;
            }
        };

        let envelope = app.handle(request).await;
        if raw_json {
            println!("{}", envelope.to_json_pretty()?);
        } else {
            print!("{}", render(&envelope));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cart_commands() {
        assert_eq!(
            parse_line("/add BRD-001"),
            ReplInput::Command(CartCommand::Add {
                item: "BRD-001".into(),
                quantity: 1
            })
        );
        assert_eq!(
            parse_line("/add BRD-001 3"),
            ReplInput::Command(CartCommand::Add {
                item: "BRD-001".into(),
                quantity: 3
            })
        );
        assert_eq!(
            parse_line("/set MLK-002 0"),
            ReplInput::Command(CartCommand::SetQuantity {
                item: "MLK-002".into(),
                quantity: 0
            })
        );
        assert_eq!(
            parse_line("/remove JAM-001"),
            ReplInput::Command(CartCommand::Remove {
                item: "JAM-001".into()
            })
        );
        assert_eq!(parse_line("/cart"), ReplInput::Command(CartCommand::View));
        assert_eq!(parse_line("/confirm"), ReplInput::Command(CartCommand::Confirm));
    }

    #[test]
    fn test_parse_text_and_controls() {
        assert_eq!(
            parse_line("  gluten free bread "),
            ReplInput::Text("gluten free bread".into())
        );
        assert_eq!(parse_line(""), ReplInput::Empty);
        assert_eq!(parse_line("/quit"), ReplInput::Quit);
        assert_eq!(parse_line("/json"), ReplInput::ToggleJson);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(parse_line("/add BRD-001 lots"), ReplInput::Invalid(_)));
        assert!(matches!(parse_line("/set BRD-001"), ReplInput::Invalid(_)));
        assert!(matches!(parse_line("/dance"), ReplInput::Invalid(_)));
    }

    #[tokio::test]
    async fn test_render_lists_candidates() {
        let app = App::start(&crate::app::AppConfig::default()).await.unwrap();
        let envelope = app
            .handle(ShoppingRequest::text("u1", "s1", "sourdough bread"))
            .await;
        let text = render(&envelope);
        assert!(text.contains(" 1. Sourdough Bread [BRD-002]"));
        app.shutdown().await;
    }
}
