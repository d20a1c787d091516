mod config;
mod error;
mod quiz;

use std::path::PathBuf;
use std::sync::Arc;

use config::Config;
use log::{error, info, warn};
use quiz::{
    ai_helper::{ChatGptBackend, QuizHelper},
    export::{self, ExportFormat},
    grading::GradingMode,
    pending::{GenerationStatus, InFlight},
    Difficulty, Question, Session, Topic, MAX_QUESTIONS,
};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatAction, InputFile, KeyboardButton, KeyboardMarkup},
};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type QuizStorage = Arc<ErasedStorage<State>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveFullName,
    ReceiveTopic {
        student: String,
    },
    ReceiveSubtopic {
        student: String,
        topic: Topic,
    },
    ReceiveDifficulty {
        student: String,
        topic: Topic,
        subtopic: Option<String>,
    },
    ReceiveAmountOfQuestions {
        student: String,
        topic: Topic,
        subtopic: Option<String>,
        difficulty: Difficulty,
    },
    AwaitingQuestion {
        session: Session,
    },
    GenerationFailed {
        session: Session,
    },
    AwaitingAnswer {
        session: Session,
    },
    Finished {
        session: Session,
    },
}

/// Shared by every handler.
struct App {
    helper: QuizHelper<ChatGptBackend>,
    in_flight: Arc<InFlight<ChatId>>,
    grading: GradingMode,
    results_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    if let Err(e) = run().await {
        error!("{}", e);
        eprintln!("pli-db2-quiz: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> HandlerResult {
    // configuration problems stop us before the bot talks to anyone
    let config = Config::from_env()?;
    let backend = ChatGptBackend::new(&config)?;
    info!(
        "Starting quiz bot (model {:?}, grading {:?})...",
        config.model, config.grading
    );

    let app = Arc::new(App {
        helper: QuizHelper::new(backend, config.timeout),
        in_flight: InFlight::new(),
        grading: config.grading,
        results_dir: config.results_dir.clone(),
    });

    let bot = Bot::new(config.telegram_token.clone());

    info!("Opening dialogue storage at {}", config.db_path);
    let storage: QuizStorage = SqliteStorage::open(&config.db_path, Json).await?.erase();

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::filter(|msg: Message| msg.text() == Some("/start")).endpoint(restart))
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveFullName].endpoint(receive_full_name))
            .branch(dptree::case![State::ReceiveTopic { student }].endpoint(receive_topic))
            .branch(
                dptree::case![State::ReceiveSubtopic { student, topic }]
                    .endpoint(receive_subtopic),
            )
            .branch(
                dptree::case![State::ReceiveDifficulty {
                    student,
                    topic,
                    subtopic
                }]
                .endpoint(receive_difficulty),
            )
            .branch(
                dptree::case![State::ReceiveAmountOfQuestions {
                    student,
                    topic,
                    subtopic,
                    difficulty
                }]
                .endpoint(receive_amount_of_questions),
            )
            .branch(dptree::case![State::AwaitingQuestion { session }].endpoint(awaiting_question))
            .branch(dptree::case![State::GenerationFailed { session }].endpoint(generation_failed))
            .branch(dptree::case![State::AwaitingAnswer { session }].endpoint(awaiting_answer))
            .branch(dptree::case![State::Finished { session }].endpoint(finished)),
    )
    .dependencies(dptree::deps![storage, app])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

    Ok(())
}

const GREETING_TEXT: &str = "Hi! I'm the PL/I and Db2 quiz bot. I ask questions written by an AI and keep score. What's your name?";
const ANY_SUBTOPIC: &str = "Any subtopic";
// control buttons carry a symbol so no generated answer option can match them
const STOP: &str = "⏹ Stop";
const SKIP: &str = "⏭ Skip";
const RETRY: &str = "🔁 Retry";
const EXPORT_TXT: &str = "Export TXT";
const EXPORT_JSON: &str = "Export JSON";
const NEW_QUIZ: &str = "New quiz";

fn keyboard<'a>(rows: impl IntoIterator<Item = &'a str>) -> KeyboardMarkup {
    KeyboardMarkup::new(
        rows.into_iter()
            .map(|label| vec![KeyboardButton::new(label)])
            .collect::<Vec<_>>(),
    )
}

fn topic_keyboard() -> KeyboardMarkup {
    keyboard(Topic::ALL.iter().map(|t| t.label()))
}

async fn restart(
    app: Arc<App>,
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
) -> HandlerResult {
    app.in_flight.cancel(&msg.chat.id);
    start(bot, dialogue, msg).await
}

async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT).await?;

    dialogue.update(State::ReceiveFullName).await?;
    Ok(())
}

async fn receive_full_name(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    let Some(full_name) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
        bot.send_message(msg.chat.id, "Please type your name").await?;
        return Ok(());
    };

    bot.send_message(
        msg.chat.id,
        format!("Nice to meet you, {}! Which topic do you want to practise?", full_name),
    )
    .reply_markup(topic_keyboard())
    .await?;

    dialogue
        .update(State::ReceiveTopic {
            student: full_name.to_string(),
        })
        .await?;
    Ok(())
}

async fn receive_topic(
    bot: Bot,
    dialogue: QuizDialogue,
    student: String,
    msg: Message,
) -> HandlerResult {
    let Some(topic) = msg.text().and_then(Topic::from_label) else {
        bot.send_message(msg.chat.id, "Please choose one of the topics")
            .reply_markup(topic_keyboard())
            .await?;
        return Ok(());
    };

    let subtopics = topic
        .subtopics()
        .iter()
        .copied()
        .chain(std::iter::once(ANY_SUBTOPIC));
    bot.send_message(msg.chat.id, format!("Pick a {} subtopic", topic))
        .reply_markup(keyboard(subtopics))
        .await?;

    dialogue
        .update(State::ReceiveSubtopic { student, topic })
        .await?;
    Ok(())
}

async fn receive_subtopic(
    bot: Bot,
    dialogue: QuizDialogue,
    (student, topic): (String, Topic),
    msg: Message,
) -> HandlerResult {
    let subtopic = match msg.text().map(str::trim) {
        Some(ANY_SUBTOPIC) => None,
        Some(text) if topic.subtopics().iter().any(|s| *s == text) => Some(text.to_string()),
        _ => {
            bot.send_message(msg.chat.id, "Please choose one of the subtopics")
                .await?;
            return Ok(());
        }
    };

    bot.send_message(msg.chat.id, "Choose a difficulty level")
        .reply_markup(keyboard(Difficulty::ALL.iter().map(|d| d.label())))
        .await?;

    dialogue
        .update(State::ReceiveDifficulty {
            student,
            topic,
            subtopic,
        })
        .await?;
    Ok(())
}

async fn receive_difficulty(
    bot: Bot,
    dialogue: QuizDialogue,
    (student, topic, subtopic): (String, Topic, Option<String>),
    msg: Message,
) -> HandlerResult {
    let Some(difficulty) = msg.text().and_then(Difficulty::from_label) else {
        bot.send_message(msg.chat.id, "Please choose one of the levels")
            .await?;
        return Ok(());
    };

    bot.send_message(msg.chat.id, "How many questions?")
        .reply_markup(keyboard(["5", "10", "15"]))
        .await?;

    dialogue
        .update(State::ReceiveAmountOfQuestions {
            student,
            topic,
            subtopic,
            difficulty,
        })
        .await?;
    Ok(())
}

async fn receive_amount_of_questions(
    app: Arc<App>,
    bot: Bot,
    dialogue: QuizDialogue,
    (student, topic, subtopic, difficulty): (String, Topic, Option<String>, Difficulty),
    msg: Message,
) -> HandlerResult {
    let amount = msg.text().and_then(|t| t.trim().parse::<usize>().ok());
    let amount = match amount {
        Some(amount) if (1..=MAX_QUESTIONS).contains(&amount) => amount,
        _ => {
            bot.send_message(
                msg.chat.id,
                format!("Please enter a number from 1 to {}", MAX_QUESTIONS),
            )
            .await?;
            return Ok(());
        }
    };

    let session = Session::new(student, topic, subtopic, difficulty, amount);
    info!(
        "Chat {} started a {} {} quiz with {} questions",
        msg.chat.id, difficulty, topic, amount
    );
    bot.send_message(msg.chat.id, "Great! Let's begin.").await?;

    request_question(app, bot, dialogue, session).await
}

/// Starts generating the next question in the background and waits in
/// `AwaitingQuestion` until it arrives.
async fn request_question(
    app: Arc<App>,
    bot: Bot,
    dialogue: QuizDialogue,
    session: Session,
) -> HandlerResult {
    let chat_id = dialogue.chat_id();

    // We don't really care if the typing indicator fails to show
    let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
    bot.send_message(
        chat_id,
        format!(
            "Generating question {} of {}...",
            session.total() + 1,
            session.planned()
        ),
    )
    .reply_markup(keyboard([STOP]))
    .await?;

    dialogue
        .update(State::AwaitingQuestion {
            session: session.clone(),
        })
        .await?;

    let request = session.generation_request();
    let generator = app.clone();
    let ticket = app.in_flight.spawn(
        chat_id,
        async move { generator.helper.generate_question(&request).await },
        move |generated| async move {
            if let Err(e) = deliver_question(bot, dialogue, session, generated).await {
                error!("Unable to deliver a question to chat {}: {}", chat_id, e);
            }
        },
    );
    log::debug!("Chat {} waiting for generation {:?}", chat_id, ticket);
    Ok(())
}

async fn deliver_question(
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: Session,
    generated: Result<Question, error::GenerationError>,
) -> HandlerResult {
    let chat_id = dialogue.chat_id();
    let question = match generated {
        Ok(question) => question,
        Err(e) => {
            warn!("Question generation failed for chat {}: {}", chat_id, e);
            bot.send_message(
                chat_id,
                format!("Sorry, I couldn't get a question: {}\nTry again?", e),
            )
            .reply_markup(keyboard([RETRY, STOP]))
            .await?;
            dialogue.update(State::GenerationFailed { session }).await?;
            return Ok(());
        }
    };

    let number = session.total() + 1;
    let presented = session.present(question)?;
    info!(
        "Chat {} got question {} ({})",
        chat_id,
        number,
        presented.subtopic().unwrap_or("any subtopic")
    );
    let mut text = format!("Question {}: \n{}", number, presented.prompt_text());
    let buttons: Vec<&str> = if presented.options().is_empty() {
        text.push_str("\n\nType your answer.");
        vec![SKIP, STOP]
    } else {
        presented
            .options()
            .iter()
            .map(String::as_str)
            .chain([SKIP, STOP])
            .collect()
    };

    bot.send_message(chat_id, text)
        .reply_markup(keyboard(buttons))
        .await?;

    dialogue.update(State::AwaitingAnswer { session }).await?;
    Ok(())
}

async fn awaiting_question(
    app: Arc<App>,
    bot: Bot,
    dialogue: QuizDialogue,
    session: Session,
    msg: Message,
) -> HandlerResult {
    if msg.text() == Some(STOP) {
        app.in_flight.cancel(&msg.chat.id);
        info!("Chat {} cancelled a pending question", msg.chat.id);
        return finish_quiz(bot, dialogue, session).await;
    }

    match app.in_flight.current(&msg.chat.id) {
        Some(GenerationStatus::Pending) => {
            bot.send_message(msg.chat.id, "Still working on your question, hang on (or press Stop)")
                .await?;
            Ok(())
        }
        // nothing in flight: the bot restarted while we were waiting
        None => request_question(app, bot, dialogue, session).await,
        // the delivery finished without moving the chat on, e.g. a failed send
        Some(status) => {
            warn!("Chat {} still waiting after a {:?} generation", msg.chat.id, status);
            request_question(app, bot, dialogue, session).await
        }
    }
}

async fn generation_failed(
    app: Arc<App>,
    bot: Bot,
    dialogue: QuizDialogue,
    session: Session,
    msg: Message,
) -> HandlerResult {
    match msg.text() {
        Some(RETRY) => request_question(app, bot, dialogue, session).await,
        Some(STOP) => finish_quiz(bot, dialogue, session).await,
        _ => {
            bot.send_message(msg.chat.id, "Please choose Retry or Stop")
                .reply_markup(keyboard([RETRY, STOP]))
                .await?;
            Ok(())
        }
    }
}

async fn awaiting_answer(
    app: Arc<App>,
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: Session,
    msg: Message,
) -> HandlerResult {
    let Some(answer) = msg.text() else {
        bot.send_message(msg.chat.id, "Please answer with text").await?;
        return Ok(());
    };

    match answer {
        STOP => {
            session.withdraw();
            return finish_quiz(bot, dialogue, session).await;
        }
        SKIP => {
            session.withdraw();
            return request_question(app, bot, dialogue, session).await;
        }
        _ => {}
    }

    let attempt = session.grade(answer, app.grading)?;
    let mut reply = if attempt.is_correct() {
        "Correct!".to_string()
    } else {
        format!(
            "Incorrect! The correct answer is: {}",
            attempt.question().expected_answer()
        )
    };
    if let Some(explanation) = attempt.question().explanation() {
        reply.push_str(&format!("\n\n{}", explanation));
    }
    bot.send_message(msg.chat.id, reply).await?;

    if session.is_complete() {
        finish_quiz(bot, dialogue, session).await
    } else {
        request_question(app, bot, dialogue, session).await
    }
}

async fn finish_quiz(bot: Bot, dialogue: QuizDialogue, session: Session) -> HandlerResult {
    let percentage = export::percentage(&session);
    let summary = format!(
        "Quiz finished! You answered {} of {} questions correctly ({:.1}%).\nGrade: {}\nWhat next?",
        session.score(),
        session.total(),
        percentage,
        export::letter_grade(percentage)
    );
    bot.send_message(dialogue.chat_id(), summary)
        .reply_markup(keyboard([EXPORT_TXT, EXPORT_JSON, NEW_QUIZ]))
        .await?;

    dialogue.update(State::Finished { session }).await?;
    Ok(())
}

async fn finished(
    app: Arc<App>,
    bot: Bot,
    dialogue: QuizDialogue,
    session: Session,
    msg: Message,
) -> HandlerResult {
    let format = match msg.text() {
        Some(EXPORT_TXT) => ExportFormat::Txt,
        Some(EXPORT_JSON) => ExportFormat::Json,
        Some(NEW_QUIZ) => {
            bot.send_message(msg.chat.id, "Which topic this time?")
                .reply_markup(topic_keyboard())
                .await?;
            dialogue
                .update(State::ReceiveTopic {
                    student: session.student().to_string(),
                })
                .await?;
            return Ok(());
        }
        _ => {
            bot.send_message(msg.chat.id, "Please choose one of the options")
                .reply_markup(keyboard([EXPORT_TXT, EXPORT_JSON, NEW_QUIZ]))
                .await?;
            return Ok(());
        }
    };

    // export failures are reported but never change the session
    match export::save_results(&session, &app.results_dir) {
        Ok(saved) => info!(
            "Chat {} results saved to {} and {}",
            msg.chat.id,
            saved.txt.display(),
            saved.json.display()
        ),
        Err(e) => {
            warn!("Unable to save results for chat {}: {}", msg.chat.id, e);
            bot.send_message(msg.chat.id, format!("Couldn't save the results on the server: {}", e))
                .await?;
        }
    }

    match export::export(&session, format) {
        Ok(bytes) => {
            let file_name = format!("{}.{}", export::file_stem(&session), format.extension());
            bot.send_document(msg.chat.id, InputFile::memory(bytes).file_name(file_name))
                .await?;
        }
        Err(e) => {
            warn!("Unable to export results for chat {}: {}", msg.chat.id, e);
            bot.send_message(msg.chat.id, format!("Couldn't export the results: {}", e))
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::grading::{is_correct, normalize};
    use crate::quiz::response;

    #[test]
    fn control_buttons_never_match_an_answer_option() {
        let reply = format!(
            r#"{{"schema": "{}", "question": "Which PL/I statement ends the program?",
                "answer": "STOP", "options": ["STOP", "SKIP", "RETRY", "EXIT"]}}"#,
            response::SCHEMA_VERSION
        );
        let parsed = response::parse(&reply).unwrap();
        for option in &parsed.options {
            for control in [STOP, SKIP, RETRY, EXPORT_TXT, EXPORT_JSON, NEW_QUIZ] {
                assert_ne!(option.as_str(), control);
                assert_ne!(normalize(option), normalize(control));
            }
        }
        assert!(is_correct(&parsed.answer, "STOP", GradingMode::Exact));
    }
}
