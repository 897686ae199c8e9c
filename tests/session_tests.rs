//! Whole-session tests: lines go in through the dispatch path, reported output
//! comes out of the session's sink.

#![expect(clippy::unwrap_used)] // test code OK

use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::rc::Rc;

use tracker::ast::Primitive;
use tracker::scope::Path;
use tracker::{Error, Interpreter, SessionConfig};

#[derive(Clone, Default)]
struct Captured(Rc<RefCell<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    /// Everything written since the last call, one entry per line
    fn lines(&self) -> Vec<String> {
        let bytes = std::mem::take(&mut *self.0.borrow_mut());
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

fn session_with(config: SessionConfig) -> (Interpreter, Captured) {
    let out = Captured::default();
    let interp = Interpreter::with_output(config, Box::new(out.clone()));
    (interp, out)
}

fn session() -> (Interpreter, Captured) {
    session_with(SessionConfig::detached())
}

/// Dispatch each line and collect what was reported
fn dispatch(interp: &mut Interpreter, out: &Captured, lines: &[&str]) -> Vec<String> {
    for line in lines {
        interp.dispatch_line(line);
    }
    out.lines()
}

#[test]
fn test_assignment_and_overwrite() {
    let (mut interp, out) = session();
    assert_eq!(
        dispatch(&mut interp, &out, &["set x, 5", "x", "set x, 10", "x"]),
        vec!["Result: 5", "Result: 10"]
    );
}

#[test]
fn test_division_by_zero_reports_and_continues() {
    let (mut interp, out) = session();
    let reported = dispatch(&mut interp, &out, &["1/0", "set y, 2", "y"]);
    assert_eq!(reported.len(), 2);
    assert!(reported[0].starts_with("Error: "), "{}", reported[0]);
    assert!(reported[0].contains("division by zero"));
    assert_eq!(reported[1], "Result: 2");
}

#[test]
fn test_nested_scopes() {
    let (mut interp, out) = session();
    assert_eq!(
        dispatch(
            &mut interp,
            &out,
            &["create group", "set group.hp, 12", "group.hp"]
        ),
        vec!["Result: 12"]
    );
    let group = interp.root().scope(&Path::root().child("group")).unwrap();
    assert_eq!(group.path().to_string(), "root.group");
}

#[test]
fn test_result_rendering() {
    let (mut interp, out) = session();
    assert_eq!(
        dispatch(
            &mut interp,
            &out,
            &[
                "\"plain text\"",
                "text 4",
                "true",
                "2.5 * 2",
                "void 1",
                "missing",
                "set x, (1 +",
            ]
        ),
        vec![
            "plain text",
            "4",
            "Result: true",
            "Result: 5",
            "Error: Can not evaluate missing, since No variable missing exists in root.",
            "Error: ReadingError: Unexpected end of input at position 11",
        ]
    );
}

#[test]
fn test_loops_observe_updates() {
    let (mut interp, out) = session();
    assert_eq!(
        dispatch(
            &mut interp,
            &out,
            &[
                "set hp, 20",
                "set rounds, 0",
                "while hp > 0, set(hp, hp - 7), set(rounds, rounds + 1)",
                "rounds",
                "hp",
            ]
        ),
        vec!["Result: 3", "Result: -1"]
    );
}

#[test]
fn test_insertion_order_and_duplicates() {
    let (mut interp, out) = session();
    let reported = dispatch(
        &mut interp,
        &out,
        &[
            "set b, 1",
            "set a, 2",
            "set c, 3",
            "create c",
            "list",
        ],
    );
    assert_eq!(reported.len(), 4);
    assert_eq!(
        reported[0],
        "Error: The variable c already exists in root."
    );
    assert_eq!(reported[1..], ["b: 1", "a: 2", "c: 3"]);
}

#[test]
fn test_save_clear_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("party.sav");
    let file = file.to_str().unwrap();

    let (mut interp, out) = session();
    let setup = [
        "create party".to_owned(),
        "set party.name, \"The \\\"Lucky\\\" Few\"".to_owned(),
        "set party.gold, 12.5".to_owned(),
        "create party.front".to_owned(),
        "set party.front.hp, -3".to_owned(),
        "set party.size, 4".to_owned(),
        "list party, true".to_owned(),
        format!("save party, \"{file}\""),
        "clear party".to_owned(),
        "list party, true".to_owned(),
    ];
    let setup: Vec<&str> = setup.iter().map(String::as_str).collect();
    let before = dispatch(&mut interp, &out, &setup);
    assert_eq!(
        before,
        vec![
            "name: \"The \\\"Lucky\\\" Few\"",
            "gold: 12.5",
            "front:",
            "   hp: -3",
            "size: 4",
        ]
    );

    let load = format!("load \"{file}\", party");
    let after = dispatch(&mut interp, &out, &[load.as_str(), "list party, true"]);
    assert_eq!(after, before);
    assert_eq!(interp.cursor(), &Path::root());
}

#[test]
fn test_round_trip_with_fields_named_like_commands() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("g.sav");
    let file = file.to_str().unwrap();

    let (mut interp, out) = session();
    let setup = [
        "create g".to_owned(),
        "set g.set, 1".to_owned(),
        "set g.hp, 2".to_owned(),
        "set g.list, \"x\"".to_owned(),
        "list g".to_owned(),
        format!("save g, \"{file}\""),
        "clear g".to_owned(),
    ];
    let setup: Vec<&str> = setup.iter().map(String::as_str).collect();
    let before = dispatch(&mut interp, &out, &setup);
    assert_eq!(before, vec!["set: 1", "hp: 2", "list: \"x\""]);

    let load = format!("load \"{file}\", g");
    assert_eq!(dispatch(&mut interp, &out, &[load.as_str()]), Vec::<String>::new());
    assert_eq!(dispatch(&mut interp, &out, &["list g"]), before);
}

#[test]
fn test_field_named_like_a_command() {
    let (mut interp, out) = session();
    assert_eq!(
        dispatch(
            &mut interp,
            &out,
            &[
                "create hero",
                "set hero.move, 30",
                "env hero",
                "set a, 1",
                "move a, b",
                "b",
                "b, 5",
                "env",
                "hero.move",
            ]
        ),
        vec![
            "Result: 1",
            "Error: Could not evaluate b: b is not a command and takes no arguments",
            "Result: 30",
        ]
    );
}

#[test]
fn test_load_into_the_current_scope() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("stats.sav");
    fs::write(&file, "set hp, 7\ncreate gear\nset gear.rope, true\n").unwrap();

    let (mut interp, out) = session();
    let lines = [
        "create hero".to_owned(),
        "env hero".to_owned(),
        format!("load \"{}\"", file.display()),
        "env".to_owned(),
        "hero.gear.rope".to_owned(),
        "hero.hp".to_owned(),
    ];
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    assert_eq!(
        dispatch(&mut interp, &out, &lines),
        vec!["Result: true", "Result: 7"]
    );
}

#[test]
fn test_load_aborts_on_first_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("broken.sav");
    fs::write(&file, "set a, 1\nset b, 1/0\nset c, 3\n").unwrap();

    let (mut interp, _) = session();
    let err = interp
        .execute_line(&format!("load \"{}\"", file.display()))
        .unwrap_err();
    assert!(matches!(err, Error::Evaluation { .. }));
    assert!(err.to_string().contains("broken.sav:2"), "{err}");

    assert_eq!(interp.execute_line("a").unwrap(), Primitive::Number(1.0));
    assert!(interp.execute_line("b").is_err());
    assert!(interp.execute_line("c").is_err());
}

#[test]
fn test_run_binds_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("damage.scr");
    fs::write(
        &script,
        "# apply $1 damage to $0\nset $0, $0 - $1\nprint \"took\", $1\n$0\n",
    )
    .unwrap();

    let (mut interp, out) = session();
    let run = format!("run \"{}\", hp, 4 + 1", script.display());
    assert_eq!(
        dispatch(&mut interp, &out, &["set hp, 12", run.as_str()]),
        vec!["took 5", "Result: 7"]
    );
    assert_eq!(interp.execute_line("hp").unwrap(), Primitive::Number(7.0));
}

#[test]
fn test_missing_script_is_reported() {
    let (mut interp, out) = session();
    let reported = dispatch(&mut interp, &out, &["run \"/nonexistent/nothing.scr\""]);
    assert_eq!(reported.len(), 1);
    assert!(reported[0].starts_with("Error: Can not access '/nonexistent/nothing.scr'"));
}

#[test]
fn test_startup_script_continues_after_errors() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("startup.scr");
    fs::write(&script, "set a, 1\nnonsense + 1\nset b, 2\n\nprint \"ready\"\n").unwrap();

    let (mut interp, out) =
        session_with(SessionConfig::detached().with_startup_script(&script));
    interp.run_startup();

    let reported = out.lines();
    assert_eq!(reported.len(), 2);
    assert!(reported[0].starts_with("Error: "));
    assert_eq!(reported[1], "ready");
    assert_eq!(interp.execute_line("a + b").unwrap(), Primitive::Number(3.0));
}

#[test]
fn test_quit_ends_the_session() {
    let (mut interp, out) = session();
    assert!(interp.is_running());
    assert_eq!(dispatch(&mut interp, &out, &["exit"]), Vec::<String>::new());
    assert!(!interp.is_running());
}
