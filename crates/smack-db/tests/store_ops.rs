//! Integration tests for the relational store.

use smack_db::Database;
use uuid::Uuid;

fn temp_db() -> Database {
    let mut path = std::env::temp_dir();
    path.push(format!("smack-test-{}.db", Uuid::new_v4()));
    Database::open(&path).expect("open db")
}

/// Timestamps have microsecond precision; keep inserts whose relative order
/// matters strictly apart.
fn tick() {
    std::thread::sleep(std::time::Duration::from_millis(2));
}

#[test]
fn bootstrap_seeds_general_and_smackbot() {
    let db = temp_db();

    let smackbot = db.get_smackbot().expect("query").expect("smackbot exists");
    assert_eq!(smackbot.username, "smackbot");
    assert!(smackbot.password_hash.is_empty());

    let channels = db.get_public_channels().expect("channels");
    assert!(channels.iter().any(|c| c.name == "general"));
}

#[test]
fn new_users_auto_join_general() {
    let db = temp_db();
    let user = db.create_user("alice", "Alice", "hash").expect("create");

    let channels = db.get_channels_for_user(&user.id).expect("channels");
    assert!(channels.iter().any(|c| c.channel.name == "general"));
}

#[test]
fn dm_channel_requests_converge_on_one_row() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let b = db.create_user("bob", "Bob", "h").unwrap();

    let first = db.get_or_create_dm_channel(&a.id, &b.id).expect("dm");
    let second = db.get_or_create_dm_channel(&a.id, &b.id).expect("dm again");
    // Opening from the other side converges too.
    let third = db.get_or_create_dm_channel(&b.id, &a.id).expect("dm reversed");

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, third.id);
    assert!(first.is_direct);
}

#[test]
fn dm_channels_display_the_other_participant() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let b = db.create_user("bob", "Bob", "h").unwrap();
    db.get_or_create_dm_channel(&a.id, &b.id).unwrap();

    let channels = db.get_channels_for_user(&a.id).unwrap();
    let dm = channels
        .iter()
        .find(|c| c.channel.is_direct)
        .expect("dm listed");
    assert_eq!(dm.channel.name, "Bob");

    let channels = db.get_channels_for_user(&b.id).unwrap();
    let dm = channels.iter().find(|c| c.channel.is_direct).unwrap();
    assert_eq!(dm.channel.name, "Alice");
}

#[test]
fn unread_counts_follow_last_read() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let b = db.create_user("bob", "Bob", "h").unwrap();
    let channel = db.create_channel("dev", "", &a.id, false).unwrap();
    db.join_channel(&channel.id, &b.id).unwrap();

    db.create_message(&channel.id, &a.id, "one", None).unwrap();
    db.create_message(&channel.id, &a.id, "two", None).unwrap();

    let unread = |user: &str| {
        db.get_channels_for_user(user)
            .unwrap()
            .into_iter()
            .find(|c| c.channel.id == channel.id)
            .unwrap()
            .unread_count
    };

    assert_eq!(unread(&b.id), 2);

    db.mark_channel_read(&channel.id, &b.id).unwrap();
    assert_eq!(unread(&b.id), 0);
    tick();

    db.create_message(&channel.id, &a.id, "three", None).unwrap();
    assert_eq!(unread(&b.id), 1);

    // Thread replies never count as unread top-level messages.
    let parent = db.create_message(&channel.id, &a.id, "parent", None).unwrap();
    tick();
    db.mark_channel_read(&channel.id, &b.id).unwrap();
    tick();
    db.create_message(&channel.id, &a.id, "reply", Some(&parent.id))
        .unwrap();
    assert_eq!(unread(&b.id), 0);
}

#[test]
fn pagination_returns_chronological_windows() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let channel = db.create_channel("dev", "", &a.id, false).unwrap();

    for i in 0..5 {
        db.create_message(&channel.id, &a.id, &format!("m{i}"), None)
            .unwrap();
        tick();
    }

    let window = db.get_channel_messages(&channel.id, 3).unwrap();
    let contents: Vec<_> = window.iter().map(|m| m.message.content.as_str()).collect();
    assert_eq!(contents, vec!["m2", "m3", "m4"]);

    let cursor = window[0].message.created_at;
    let earlier = db
        .get_channel_messages_before(&channel.id, 10, Some(cursor))
        .unwrap();
    let contents: Vec<_> = earlier.iter().map(|m| m.message.content.as_str()).collect();
    assert_eq!(contents, vec!["m0", "m1"]);
}

#[test]
fn thread_fetch_returns_parent_then_replies() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let channel = db.create_channel("dev", "", &a.id, false).unwrap();

    let parent = db.create_message(&channel.id, &a.id, "parent", None).unwrap();
    tick();
    db.create_message(&channel.id, &a.id, "r1", Some(&parent.id))
        .unwrap();
    tick();
    db.create_message(&channel.id, &a.id, "r2", Some(&parent.id))
        .unwrap();

    let thread = db.get_thread_messages(&parent.id).unwrap();
    let contents: Vec<_> = thread.iter().map(|m| m.message.content.as_str()).collect();
    assert_eq!(contents, vec!["parent", "r1", "r2"]);

    let window = db.get_channel_messages(&channel.id, 50).unwrap();
    let parent_row = window
        .iter()
        .find(|m| m.message.id == parent.id)
        .expect("parent in window");
    assert_eq!(parent_row.reply_count, 2);
    assert!(parent_row.latest_reply.is_some());
}

#[test]
fn deleting_a_message_cascades_to_replies_and_reactions() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let channel = db.create_channel("dev", "", &a.id, false).unwrap();

    let parent = db.create_message(&channel.id, &a.id, "parent", None).unwrap();
    let reply = db
        .create_message(&channel.id, &a.id, "reply", Some(&parent.id))
        .unwrap();
    db.add_reaction(&parent.id, &a.id, "👍").unwrap();
    db.add_reaction(&reply.id, &a.id, "🎉").unwrap();

    db.delete_message(&parent.id).unwrap();

    assert!(db.get_message(&parent.id).unwrap().is_none());
    assert!(db.get_message(&reply.id).unwrap().is_none());
    assert!(db.get_reactions_for_message(&parent.id).unwrap().is_empty());
    assert!(db.get_reactions_for_message(&reply.id).unwrap().is_empty());
}

#[test]
fn duplicate_reactions_are_ignored() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let channel = db.create_channel("dev", "", &a.id, false).unwrap();
    let msg = db.create_message(&channel.id, &a.id, "hi", None).unwrap();

    db.add_reaction(&msg.id, &a.id, "👍").unwrap();
    db.add_reaction(&msg.id, &a.id, "👍").unwrap();

    let groups = db.get_reactions_for_message(&msg.id).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].count, 1);
}

#[test]
fn ensure_bot_user_is_idempotent() {
    let db = temp_db();
    db.ensure_bot_user("bot-1", "bot-test", "Test Bot", "").unwrap();
    db.ensure_bot_user("bot-1", "bot-test", "Test Bot", "").unwrap();

    let user = db.get_user_by_id("bot-1").unwrap().expect("bot user");
    assert_eq!(user.display_name, "Test Bot");
    assert!(user.password_hash.is_empty());
}

#[test]
fn bot_dm_binding_marks_channel_as_bot_channel() {
    let db = temp_db();
    let user = db.create_user("alice", "Alice", "h").unwrap();
    db.create_bot("openai-gpt", "openai", "ChatGPT", "", "openai", "gpt-5.2", "")
        .unwrap();

    let channel = db
        .get_or_create_bot_dm_channel(&user.id, "openai-gpt")
        .unwrap();
    assert!(db.is_bot_channel(&channel.id).unwrap());

    let bot = db
        .get_bot_for_channel(&channel.id)
        .unwrap()
        .expect("bound bot");
    assert_eq!(bot.id, "openai-gpt");

    // A plain channel is not a bot channel.
    let plain = db.create_channel("dev", "", &user.id, false).unwrap();
    assert!(!db.is_bot_channel(&plain.id).unwrap());

    let again = db
        .get_or_create_bot_dm_channel(&user.id, "openai-gpt")
        .unwrap();
    assert_eq!(channel.id, again.id);
}

#[test]
fn command_resolution_prefers_private_and_skips_disabled() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let b = db.create_user("bob", "Bob", "h").unwrap();

    db.create_command(
        "weather", "", "https://global.example/q={{input}}", "GET", "", "", "private", &a.id, true,
    )
    .unwrap();
    let private = db
        .create_command(
            "weather", "", "https://mine.example/q={{input}}", "GET", "", "", "private", &b.id,
            false,
        )
        .unwrap();

    let resolved = db.get_command_by_name("weather", &b.id).unwrap().unwrap();
    assert_eq!(resolved.id, private.id, "private match wins");

    let resolved = db.get_command_by_name("weather", &a.id).unwrap().unwrap();
    assert!(resolved.is_global, "other users get the global command");

    let disable = smack_types::api::UpdateCommandRequest {
        enabled: Some(false),
        ..Default::default()
    };
    db.update_command(&private.id, &disable).unwrap();

    let resolved = db.get_command_by_name("weather", &b.id).unwrap().unwrap();
    assert!(resolved.is_global, "disabled rows never resolve");
}

#[test]
fn sessions_validate_and_expire() {
    let db = temp_db();
    let user = db.create_user("alice", "Alice", "h").unwrap();

    db.create_session("tok-live", &user.id, chrono::Utc::now() + chrono::Duration::days(7))
        .unwrap();
    db.create_session("tok-dead", &user.id, chrono::Utc::now() - chrono::Duration::minutes(1))
        .unwrap();

    assert_eq!(
        db.get_session_user("tok-live").unwrap().as_deref(),
        Some(user.id.as_str())
    );
    assert!(db.get_session_user("tok-dead").unwrap().is_none());
    assert!(db.get_session_user("tok-unknown").unwrap().is_none());
}

#[test]
fn reminders_sweep_due_rows_only() {
    let db = temp_db();
    let user = db.create_user("alice", "Alice", "h").unwrap();

    let due = db
        .create_reminder(
            &user.id,
            "any",
            "stand up",
            chrono::Utc::now() - chrono::Duration::seconds(1),
        )
        .unwrap();
    db.create_reminder(
        &user.id,
        "any",
        "later",
        chrono::Utc::now() + chrono::Duration::hours(1),
    )
    .unwrap();

    let due_rows = db.get_due_reminders().unwrap();
    assert_eq!(due_rows.len(), 1);
    assert_eq!(due_rows[0].id, due.id);

    db.mark_reminder_complete(&due.id).unwrap();
    assert!(db.get_due_reminders().unwrap().is_empty());
}

#[test]
fn move_card_shifts_target_column_positions() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let board = db.create_board("roadmap", "", "", &a.id).unwrap();
    let todo = db.create_column(&board.id, "todo", None).unwrap();
    let doing = db.create_column(&board.id, "doing", None).unwrap();

    let c1 = db
        .create_card(&todo.id, &board.id, "one", "", &a.id, None)
        .unwrap();
    let c2 = db
        .create_card(&doing.id, &board.id, "two", "", &a.id, None)
        .unwrap();

    db.move_card(&c1.id, &doing.id, 0).unwrap();

    let cards = db.get_cards_for_column(&doing.id).unwrap();
    let titles: Vec<_> = cards.iter().map(|c| c.card.title.as_str()).collect();
    assert_eq!(titles, vec!["one", "two"]);
    assert_eq!(cards[0].card.id, c1.id);
    assert_eq!(cards[1].card.id, c2.id);
    assert!(db.get_cards_for_column(&todo.id).unwrap().is_empty());
}

#[test]
fn set_assignees_and_labels_replace_atomically() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let b = db.create_user("bob", "Bob", "h").unwrap();
    let board = db.create_board("roadmap", "", "", &a.id).unwrap();
    let column = db.create_column(&board.id, "todo", None).unwrap();
    let card = db
        .create_card(&column.id, &board.id, "one", "", &a.id, None)
        .unwrap();
    let red = db.create_label(&board.id, "bug", "#ff0000").unwrap();
    let blue = db.create_label(&board.id, "chore", "#0000ff").unwrap();

    db.set_card_assignees(&card.id, &[a.id.clone(), b.id.clone()])
        .unwrap();
    db.set_card_labels(&card.id, &[red.id.clone()]).unwrap();

    let details = db.get_card_with_details(&card.id).unwrap().unwrap();
    assert_eq!(details.assignees.len(), 2);
    assert_eq!(details.labels.len(), 1);

    db.set_card_assignees(&card.id, &[b.id.clone()]).unwrap();
    db.set_card_labels(&card.id, &[blue.id.clone()]).unwrap();

    let details = db.get_card_with_details(&card.id).unwrap().unwrap();
    assert_eq!(details.assignees.len(), 1);
    assert_eq!(details.assignees[0].id, b.id);
    assert_eq!(details.labels[0].id, blue.id);
}

#[test]
fn reorder_columns_is_transactional() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let board = db.create_board("roadmap", "", "", &a.id).unwrap();
    let c1 = db.create_column(&board.id, "one", None).unwrap();
    let c2 = db.create_column(&board.id, "two", None).unwrap();
    let c3 = db.create_column(&board.id, "three", None).unwrap();

    db.reorder_columns(&board.id, &[c3.id.clone(), c1.id.clone(), c2.id.clone()])
        .unwrap();

    let columns = db.get_columns_with_cards(&board.id).unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.column.name.as_str()).collect();
    assert_eq!(names, vec!["three", "one", "two"]);
}

#[test]
fn app_creation_makes_the_creator_owner() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let app = db.create_app("todo", "", "", &a.id).unwrap();

    assert_eq!(
        db.get_app_member_role(&app.id, &a.id).unwrap().as_deref(),
        Some("owner")
    );
    assert!(db.is_app_member(&app.id, &a.id).unwrap());

    let apps = db.get_apps_for_user(&a.id).unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].member_count, 1);
}

#[test]
fn app_messages_window_is_chronological() {
    let db = temp_db();
    let a = db.create_user("alice", "Alice", "h").unwrap();
    let app = db.create_app("todo", "", "", &a.id).unwrap();

    db.create_app_message(&app.id, &a.id, "user", "make a todo app")
        .unwrap();
    tick();
    db.create_app_message(&app.id, "assistant", "assistant", "done")
        .unwrap();

    let history = db.get_app_messages(&app.id, 20).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "user");
    assert_eq!(history[1].role, "assistant");
}
