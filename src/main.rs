use avatar_kiosk_rs::config::{load_config, AvatarSettings, Language, Quality};
use avatar_kiosk_rs::session::wire::WireConnector;
use avatar_kiosk_rs::session::SessionController;
use avatar_kiosk_rs::token::TokenProvider;
use clap::Parser;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "avatar-kiosk", about = "Terminal front-end for the streaming avatar client")]
struct Args {
    /// Avatar persona to start
    #[arg(long, default_value = "Thaddeus_ProfessionalLook_public")]
    avatar: String,

    /// Knowledge base backing conversational replies
    #[arg(long, default_value = "2d6a4ab546da4b10885a3cc2658198f8")]
    knowledge_base: String,

    /// Initial language code (en, es, fr, ...)
    #[arg(long, default_value = "en")]
    language: String,

    /// Rendering quality: low, medium or high
    #[arg(long, default_value = "high")]
    quality: String,

    /// Line spoken verbatim right after connecting
    #[arg(long)]
    greeting: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewMode {
    Transcript,
    TextChat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    log::info!("Starting avatar-kiosk");

    let args = Args::parse();
    let api_config = load_config()?;

    let language = Language::from_str(&args.language)
        .map_err(|_| anyhow::anyhow!("Unknown language code: {}", args.language))?;
    let quality = Quality::from_str(&args.quality)
        .map_err(|_| anyhow::anyhow!("Unknown quality: {}", args.quality))?;

    let settings = AvatarSettings {
        quality,
        avatar_name: args.avatar,
        knowledge_base_id: args.knowledge_base,
        language,
        greeting: args.greeting,
        ..AvatarSettings::default()
    };

    let tokens = TokenProvider::new(
        api_config.token_endpoint.clone(),
        api_config.api_key().to_string(),
    );
    let connector = WireConnector::new(api_config.session_endpoint.clone());
    let mut controller = SessionController::new(tokens, connector, settings);

    controller.init_microphone();

    // Status and transcript lines print as they arrive
    let mut status_rx = controller.subscribe_status();
    tokio::spawn(async move {
        while let Ok(message) = status_rx.recv().await {
            println!("* {}", message);
        }
    });
    let mut updates_rx = controller.subscribe_updates();
    tokio::spawn(async move {
        while let Ok(entry) = updates_rx.recv().await {
            println!("[{:?}] {}", entry.role, entry.text);
        }
    });
    let mut media_rx = controller.media_stream();
    tokio::spawn(async move {
        while media_rx.changed().await.is_ok() {
            match media_rx.borrow_and_update().as_ref() {
                Some(stream) => log::info!("Media stream attached: {}", stream.id),
                None => log::info!("Media stream detached"),
            }
        }
    });

    println!("Commands: connect | disconnect | mute | lang <code> | say <text> | transcript | view | quit");

    let mut view = ViewMode::Transcript;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "connect" => controller.connect().await,
            "disconnect" => controller.disconnect().await,
            "mute" => controller.toggle_microphone().await,
            "lang" => match Language::from_str(rest) {
                Ok(language) => controller.set_language(language),
                Err(_) => println!("Unknown language code: {}", rest),
            },
            "say" => controller.send_text(rest).await,
            "transcript" => {
                let transcript = controller.transcript();
                let transcript = transcript.lock().unwrap();
                if transcript.is_empty() {
                    println!("Start a conversation!");
                } else {
                    for entry in transcript.entries() {
                        println!(
                            "{} [{:?}] {}",
                            entry.timestamp.format("%H:%M:%S"),
                            entry.role,
                            entry.text
                        );
                    }
                }
            }
            "view" => {
                view = match view {
                    ViewMode::Transcript => ViewMode::TextChat,
                    ViewMode::TextChat => ViewMode::Transcript,
                };
                println!("View: {:?}", view);
            }
            "quit" | "exit" => break,
            "" => {}
            other => println!("Unknown command: {}", other),
        }
    }

    controller.shutdown().await;
    log::info!("Goodbye");
    Ok(())
}
