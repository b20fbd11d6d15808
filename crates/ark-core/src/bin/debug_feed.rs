//! Walk a few pages of a feed against live relays and print what the
//! engine returns, then rebuild the thread of the newest note.
//!
//! Usage: debug_feed [hashtag] [pages]
//! Set ARK_CONFIG to a JSON config file to override relays or the data dir.
use std::collections::HashSet;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ark_core::constants::DEFAULT_FEED_LIMIT;
use ark_core::{init_tracing, Ark, ArkConfig, EventFilter, ThreadNode};

fn print_tree<'a>(node: &'a ThreadNode, depth: usize, printed: &mut HashSet<&'a str>) {
    let short = &node.event.id[..12.min(node.event.id.len())];
    if !printed.insert(node.id()) {
        println!("{:indent$}- {short} (shown above)", "", indent = depth * 2);
        return;
    }
    println!(
        "{:indent$}- {} ({} replies)",
        "",
        short,
        node.descendant_count(),
        indent = depth * 2
    );
    for reply in &node.replies {
        print_tree(reply, depth + 1, printed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let hashtag = args.next();
    let pages: usize = match args.next() {
        Some(raw) => raw.parse().context("pages must be a number")?,
        None => 3,
    };

    let config = match std::env::var("ARK_CONFIG") {
        Ok(path) => ArkConfig::load(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => ArkConfig::default(),
    };
    println!("Relays: {:?}", config.relays);

    let ark = Ark::open(config).await?;

    let mut filter = EventFilter::new().kind(1);
    if let Some(tag) = &hashtag {
        filter = filter.hashtag(tag.clone());
    }

    let cancel = CancellationToken::new();
    let mut paginator = ark.paginator(filter, DEFAULT_FEED_LIMIT, true);
    let mut newest = None;

    for page_no in 1..=pages {
        let cursor = paginator.cursor();
        let page = ark.next_page(&mut paginator, &cancel).await?;
        println!(
            "\n=== Page {page_no} (cursor {cursor}) -> {} events, next {:?} ===",
            page.events.len(),
            page.next_cursor
        );
        for event in &page.events {
            let preview: String = event.content.chars().take(60).collect();
            println!(
                "  {} {} {}",
                event.created_at,
                &event.pubkey[..8.min(event.pubkey.len())],
                preview.replace('\n', " ")
            );
        }
        if newest.is_none() {
            newest = page.events.first().map(|e| e.id.clone());
        }
        if page.next_cursor.is_none() {
            break;
        }
    }

    if let Some(id) = newest {
        println!("\n=== Thread of {} ===", &id[..12.min(id.len())]);
        let thread = ark.thread(&id).await?;
        let mut printed = HashSet::new();
        for node in thread.replies() {
            print_tree(node, 0, &mut printed);
        }
    }

    println!("\n=== Done ===");
    Ok(())
}
