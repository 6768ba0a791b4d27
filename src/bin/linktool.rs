//! Tracking link encoder/decoder

use anyhow::Result;
use clap::{Parser, Subcommand};
use smtp_track_proxy::tracking::{decode_link, encode_link};

/// Build or inspect engagement-tracking links
#[derive(Parser, Debug)]
#[command(name = "tracking-linktool")]
#[command(version = smtp_track_proxy::VERSION)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Encode a tracking link
    Encode {
        /// Tracking base URL
        #[arg(short, long)]
        tracking_url: String,

        /// Event type: open, initial_open or click
        #[arg(short, long, default_value = "click")]
        action: String,

        /// Message id
        #[arg(short, long, default_value = "")]
        message_id: String,

        /// Recipient address
        #[arg(short, long, default_value = "")]
        rcpt_to: String,

        /// Link target (click only)
        #[arg(short = 'l', long, default_value = "")]
        target: String,
    },

    /// Decode one or more tracking links
    Decode {
        /// Links to decode
        #[arg(required = true)]
        links: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::Encode {
            tracking_url,
            action,
            message_id,
            rcpt_to,
            target,
        } => {
            let link = encode_link(
                &tracking_url,
                &action,
                &message_id,
                &rcpt_to,
                &target,
                true,
                true,
                true,
            )?;
            println!("{link}");
        }

        Cmd::Decode { links } => {
            let mut failed = 0;
            for link in &links {
                match decode_link(link) {
                    Ok(decoded) => {
                        println!("Tracking domain: {}", decoded.tracking_domain);
                        println!("Event type:      {}", decoded.data.event_type());
                        println!("{}", String::from_utf8_lossy(&decoded.json));
                    }
                    Err(e) => {
                        eprintln!("Error: {}: {}", link, e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} links could not be decoded", failed, links.len());
            }
        }
    }

    Ok(())
}
