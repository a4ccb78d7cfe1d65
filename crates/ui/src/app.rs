use std::io::Write;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::sync::Arc;

use danzin_llm::{ChatBackend, ImageAttachment};
use danzin_storage::{Conversation, ConversationId, MemoryStore, MessageId, MessageRole};
use snafu::{ResultExt, Snafu, ensure};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{
    ChatController, ChatSurface, SendOutcome, SendRejection, SidebarEntry, filter_entries,
    load_image,
};
use crate::settings::SettingsStore;

pub const HELP_TEXT: &str = "\
Comandos:
  <texto>                 envia uma mensagem
  /image <arquivo> [texto] envia uma imagem com texto opcional
  /new                    inicia uma nova conversa
  /list                   lista as conversas
  /search <texto>         busca conversas pelo título
  /open <n>               abre a conversa n da lista
  /delete <n>             exclui a conversa n da lista
  /reload                 recarrega as configurações
  /help                   mostra esta ajuda
  /quit                   sai";

/// One parsed line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Send(String),
    Image { path: PathBuf, text: String },
    NewChat,
    List,
    Search(String),
    /// 1-based position in the last listing.
    Open(usize),
    Delete(usize),
    Reload,
    Help,
    Quit,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("unknown command '/{name}'"))]
    UnknownCommand { stage: &'static str, name: String },
    #[snafu(display("'/{command}' needs an argument"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
    },
    #[snafu(display("'{raw}' is not a conversation number: {source}"))]
    InvalidIndex {
        stage: &'static str,
        raw: String,
        source: ParseIntError,
    },
    #[snafu(display("conversation numbers start at 1"))]
    ZeroIndex { stage: &'static str },
}

impl ShellCommand {
    /// Parses a line; blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Send(line.to_string())));
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };

        let command = match name {
            "image" | "img" => {
                ensure!(
                    !argument.is_empty(),
                    MissingArgumentSnafu {
                        stage: "parse-image-command",
                        command: "image",
                    }
                );
                let (path, text) = match argument.split_once(char::is_whitespace) {
                    Some((path, text)) => (path, text.trim()),
                    None => (argument, ""),
                };
                Self::Image {
                    path: PathBuf::from(path),
                    text: text.to_string(),
                }
            }
            "new" => Self::NewChat,
            "list" | "ls" => Self::List,
            "search" => Self::Search(argument.to_string()),
            "open" => Self::Open(parse_index(argument, "open")?),
            "delete" | "rm" => Self::Delete(parse_index(argument, "delete")?),
            "reload" => Self::Reload,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => {
                return UnknownCommandSnafu {
                    stage: "parse-command-name",
                    name: other.to_string(),
                }
                .fail();
            }
        };

        Ok(Some(command))
    }
}

fn parse_index(argument: &str, command: &'static str) -> Result<usize, CommandError> {
    ensure!(
        !argument.is_empty(),
        MissingArgumentSnafu {
            stage: "parse-conversation-index",
            command,
        }
    );
    let index = argument.parse::<usize>().context(InvalidIndexSnafu {
        stage: "parse-conversation-index",
        raw: argument.to_string(),
    })?;
    ensure!(
        index > 0,
        ZeroIndexSnafu {
            stage: "parse-conversation-index",
        }
    );
    Ok(index)
}

/// Renders the active conversation as an append-only transcript.
///
/// Only text that has not been printed yet is written, so streamed chunks appear in place.
pub struct TerminalSurface<W: Write> {
    out: W,
    settings: SettingsStore,
    conversation_id: Option<ConversationId>,
    printed: Vec<(MessageId, usize)>,
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W, settings: SettingsStore) -> Self {
        Self {
            out,
            settings,
            conversation_id: None,
            printed: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, conversation: &Conversation) -> std::io::Result<()> {
        if self.conversation_id != Some(conversation.id) {
            self.conversation_id = Some(conversation.id);
            self.printed.clear();
            writeln!(self.out, "\n== {} ==", conversation.title)?;
        }

        let assistant_name = self.settings.settings().assistant_name.clone();
        for message in &conversation.messages {
            let content = message.content.as_str();
            match self.printed.iter_mut().find(|(id, _)| *id == message.id) {
                Some((_, printed_len)) => {
                    if content.len() > *printed_len && content.is_char_boundary(*printed_len) {
                        write!(self.out, "{}", &content[*printed_len..])?;
                        *printed_len = content.len();
                    }
                }
                // Placeholders show up with their first chunk.
                None if content.is_empty() && !message.is_user() => {}
                None => {
                    let speaker = match message.role {
                        MessageRole::User => "Você",
                        MessageRole::Assistant => assistant_name.as_str(),
                    };
                    write!(self.out, "\n{speaker}: ")?;
                    if message.image_url.is_some() {
                        write!(self.out, "[imagem] ")?;
                    }
                    write!(self.out, "{content}")?;
                    self.printed.push((message.id, content.len()));
                }
            }
        }

        self.out.flush()
    }

    fn write_line(&mut self, line: &str) {
        if let Err(error) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            tracing::debug!(error = %error, "failed to write to terminal");
        }
    }
}

impl<W: Write> ChatSurface for TerminalSurface<W> {
    fn conversation_changed(&mut self, conversation: &Conversation) {
        if let Err(error) = self.render(conversation) {
            tracing::debug!(error = %error, "failed to render conversation");
        }
    }

    fn busy_changed(&mut self, busy: bool) {
        if busy {
            let label = self.settings.settings().typing_label();
            self.write_line(&format!("\n({label})"));
        } else {
            self.write_line("");
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to read terminal input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Line-oriented chat shell over stdin and stdout.
pub struct TerminalApp {
    controller: ChatController,
    settings: SettingsStore,
    /// Snapshot behind `/open` and `/delete` numbers.
    listing: Vec<SidebarEntry>,
}

impl TerminalApp {
    pub fn new(settings: SettingsStore, backend: Arc<dyn ChatBackend>) -> Self {
        let store = MemoryStore::new(settings.settings().greeting.clone());
        let surface = TerminalSurface::new(std::io::stdout(), settings.clone());
        let controller = ChatController::new(store, backend, Box::new(surface));
        Self {
            controller,
            settings,
            listing: Vec::new(),
        }
    }

    pub async fn run(mut self) -> Result<(), AppError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut input_closed = false;

        println!("{HELP_TEXT}");
        self.controller.refresh();

        loop {
            tokio::select! {
                line = lines.next_line(), if !input_closed => {
                    match line.context(ReadInputSnafu { stage: "read-stdin-line" })? {
                        Some(line) => {
                            if self.handle_line(&line).await == Flow::Quit {
                                break;
                            }
                        }
                        None => input_closed = true,
                    }
                }
                event = self.controller.next_stream_event() => {
                    self.controller.handle_stream_event(event);
                }
            }

            // Piped input ends before the reply does; wait for it.
            if input_closed && !self.controller.is_busy() {
                break;
            }
        }

        self.controller.shutdown();
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        let command = match ShellCommand::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Flow::Continue,
            Err(error) => {
                println!("{error}. Use /help.");
                return Flow::Continue;
            }
        };

        match command {
            ShellCommand::Send(text) => self.send(&text, None),
            ShellCommand::Image { path, text } => {
                let max_bytes = self.settings.settings().max_image_bytes;
                match load_image(&path, max_bytes).await {
                    Ok(image) => self.send(&text, Some(image)),
                    Err(error) => println!("Não foi possível anexar a imagem: {error}"),
                }
            }
            ShellCommand::NewChat => {
                if let Err(error) = self.controller.start_new_chat() {
                    tracing::warn!(error = %error, "failed to start new chat");
                }
            }
            ShellCommand::List => {
                let entries = self.controller.sidebar_entries();
                self.print_listing(entries);
            }
            ShellCommand::Search(query) => {
                let entries = filter_entries(self.controller.sidebar_entries(), &query);
                if entries.is_empty() {
                    println!("Nenhuma conversa encontrada.");
                }
                self.print_listing(entries);
            }
            ShellCommand::Open(index) => {
                if let Some(entry) = self.listed_entry(index) {
                    if let Err(error) = self.controller.switch_conversation(entry.id) {
                        println!("Não foi possível abrir a conversa: {error}");
                    }
                }
            }
            ShellCommand::Delete(index) => self.delete(index),
            ShellCommand::Reload => match self.settings.reload() {
                Ok(settings) => {
                    self.controller.apply_settings(&settings);
                    println!("Configurações recarregadas.");
                }
                Err(error) => println!("Configurações mantidas: {error}"),
            },
            ShellCommand::Help => println!("{HELP_TEXT}"),
            ShellCommand::Quit => return Flow::Quit,
        }

        Flow::Continue
    }

    fn send(&mut self, text: &str, image: Option<ImageAttachment>) {
        match self.controller.send_message(text, image) {
            Ok(SendOutcome::Started { .. }) => {}
            Ok(SendOutcome::Rejected(SendRejection::Busy)) => {
                println!("Aguarde a resposta atual terminar.");
            }
            Ok(SendOutcome::Rejected(SendRejection::EmptyInput)) => {}
            Err(error) => {
                tracing::warn!(error = %error, "failed to send message");
                println!("Não foi possível enviar a mensagem.");
            }
        }
    }

    fn delete(&mut self, index: usize) {
        let Some(entry) = self.listed_entry(index) else {
            return;
        };
        if !entry.can_delete {
            println!("A única conversa não pode ser excluída.");
            return;
        }

        match self.controller.delete_conversation(entry.id) {
            Ok(_) => {
                self.listing.retain(|listed| listed.id != entry.id);
                println!("Conversa \"{}\" excluída.", entry.title);
            }
            Err(error) => println!("Não foi possível excluir a conversa: {error}"),
        }
    }

    fn listed_entry(&self, index: usize) -> Option<SidebarEntry> {
        let entry = self.listing.get(index - 1).cloned();
        if entry.is_none() {
            println!("Conversa {index} não está na lista. Use /list.");
        }
        entry
    }

    fn print_listing(&mut self, entries: Vec<SidebarEntry>) {
        for (position, entry) in entries.iter().enumerate() {
            let marker = if entry.is_active { '*' } else { ' ' };
            println!(
                "{marker} {:>2}. {}  ({})",
                position + 1,
                entry.title,
                entry.updated_label
            );
        }
        self.listing = entries;
    }
}
