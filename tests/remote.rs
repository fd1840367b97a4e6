mod common;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use common::{Fixture, fixture};
use netranger::remote::{CommandRunner, Rclone, SyncDirection, Tool, shell_quote};
use netranger::{Action, JobOutput, Result};

/// Answers like a mirror tool with one remote holding `notes.txt` and
/// `docs/a.md`, recording every invocation.
#[derive(Clone, Default)]
struct FakeTool {
    calls: Rc<RefCell<Vec<Vec<String>>>>,
}

impl FakeTool {
    fn called(&self, args: &[&str]) -> bool {
        self.calls.borrow().iter().any(|call| call.iter().map(String::as_str).eq(args.iter().copied()))
    }

    fn count(&self, verb: &str) -> usize {
        self.calls.borrow().iter().filter(|call| call[0] == verb).count()
    }
}

impl CommandRunner for FakeTool {
    fn run(&self, _program: &Path, args: &[String]) -> Result<String> {
        self.calls.borrow_mut().push(args.to_vec());
        let out = match (args[0].as_str(), args.get(1).map(String::as_str)) {
            ("listremotes", _) => "gdrive:\n",
            ("lsd", Some("gdrive:")) => "          -1 2021-06-01 10:00:00        -1 docs\n",
            ("lsl", Some("gdrive:")) => "     1234 2021-06-01 10:00:00.000000000 notes.txt\n",
            ("lsl", Some("gdrive:docs")) => "       10 2021-06-01 10:00:00.000000000 a.md\n",
            _ => "",
        };
        Ok(out.to_string())
    }
}

fn attach(f: &mut Fixture) -> (PathBuf, FakeTool) {
    let cache = f.home.path().canonicalize().unwrap().join("remote");
    let tool = FakeTool::default();
    let rclone = Rclone::new(
        Tool::new(PathBuf::from("rclone"), Box::new(tool.clone())),
        cache.clone(),
        HashMap::new(),
    );
    let remotes = f.controller.attach_remote(rclone).unwrap();
    assert_eq!(remotes, ["gdrive:"]);
    (cache, tool)
}

#[test]
fn remotes_are_listed_lazily() {
    let mut f = fixture();
    let (cache, tool) = attach(&mut f);
    f.host.open(&mut f.controller, &cache);
    assert_eq!(f.host.names(&f.controller), ["gdrive:"]);
    assert_eq!(tool.count("lsd"), 0);

    f.host.press(&mut f.controller, Action::Open);
    assert_eq!(f.host.names(&f.controller), ["docs", "notes.txt"]);
    assert!(tool.called(&["lsd", "gdrive:", "--max-depth", "1"]));
    assert!(tool.called(&["lsl", "gdrive:", "--max-depth", "1"]));
    // files show up as empty placeholders until opened
    assert_eq!(fs::metadata(cache.join("gdrive:/notes.txt")).unwrap().len(), 0);
    assert_eq!(tool.count("lsd"), 1);

    f.host.press(&mut f.controller, Action::ParentDir);
    assert_eq!(f.controller.buffer(f.host.current).unwrap().wd, cache);
}

#[test]
fn opening_a_placeholder_downloads_it() {
    let mut f = fixture();
    let (cache, tool) = attach(&mut f);
    f.host.open(&mut f.controller, &cache.join("gdrive:"));
    f.host.move_to_name(&mut f.controller, "notes.txt");
    f.host.press(&mut f.controller, Action::Open);

    let local = cache.join("gdrive:/notes.txt").to_string_lossy().to_string();
    assert!(tool.called(&["copyto", "gdrive:notes.txt", local.as_str()]));
    assert!(!f.host.spawned.is_empty() || !f.host.opened.is_empty());

    // a second open does not download again
    f.host.press(&mut f.controller, Action::Open);
    assert_eq!(tool.count("copyto"), 1);
}

#[test]
fn deletes_reach_the_remote() {
    let mut f = fixture();
    let (cache, tool) = attach(&mut f);
    f.host.open(&mut f.controller, &cache.join("gdrive:"));

    f.host.move_to_name(&mut f.controller, "notes.txt");
    f.host.press(&mut f.controller, Action::ForceDeleteSingle);
    assert!(tool.called(&["delete", "gdrive:notes.txt"]));

    f.host.move_to_name(&mut f.controller, "docs");
    f.host.press(&mut f.controller, Action::ForceDeleteSingle);
    assert!(tool.called(&["purge", "gdrive:docs"]));

    assert!(f.host.errors.is_empty(), "{:?}", f.host.errors);
    assert!(f.host.names(&f.controller).is_empty());
}

#[test]
fn pasting_local_files_uploads_in_the_background() {
    let mut f = fixture();
    let root = f.root.clone();
    let (cache, _tool) = attach(&mut f);
    f.host.open(&mut f.controller, &root.join("dir"));
    f.host.move_to_name(&mut f.controller, "a");
    f.host.press(&mut f.controller, Action::CopySingle);

    // the local shadow of docs only exists once its parent was listed
    f.host.open(&mut f.controller, &cache.join("gdrive:"));
    let docs = cache.join("gdrive:/docs");
    let docs_id = f.host.open(&mut f.controller, &docs);
    f.host.press(&mut f.controller, Action::Paste);
    assert_eq!(fs::read_to_string(docs.join("a")).unwrap(), "a");
    assert_eq!(f.host.names(&f.controller), ["a", "a.md"]);

    let (command, job) = f
        .host
        .jobs
        .iter()
        .find(|(command, _)| command.contains("gdrive:docs"))
        .cloned()
        .expect("upload job");
    assert!(command.starts_with("rclone copy "), "{command}");
    assert!(command.ends_with("gdrive:docs --min-size 1B"), "{command}");

    let output = JobOutput { status: 1, stdout: String::new(), stderr: "quota exceeded\n".to_string() };
    f.controller.on_job_finished(&mut f.host, job, output);
    assert_eq!(f.host.errors, ["quota exceeded"]);
    assert!(f.controller.buffer(docs_id).unwrap().content_outdated);
}

#[test]
fn moves_between_remote_dirs_stay_on_the_remote() {
    let mut f = fixture();
    let (cache, tool) = attach(&mut f);
    f.host.open(&mut f.controller, &cache.join("gdrive:"));
    f.host.move_to_name(&mut f.controller, "notes.txt");
    f.host.press(&mut f.controller, Action::CutSingle);

    f.host.open(&mut f.controller, &cache.join("gdrive:/docs"));
    f.host.press(&mut f.controller, Action::Paste);
    assert!(tool.called(&["moveto", "gdrive:notes.txt", "gdrive:docs/notes.txt"]));
    // never downloaded, never deleted separately
    assert_eq!(tool.count("copyto"), 0);
    assert_eq!(tool.count("delete"), 0);
    assert_eq!(f.host.names(&f.controller), ["a.md", "notes.txt"]);
}

#[test]
fn declining_the_install_disables_remotes() {
    let mut f = fixture();
    f.controller.config.rclone_program = "netranger-missing-mirror-tool".to_string();
    f.host.inputs.push_back(None);
    f.controller.open_remote(&mut f.host);
    assert_eq!(f.host.echoes.last().map(String::as_str), Some("Remote features disabled"));
    assert!(f.controller.fs.rclone.is_none());
    assert!(f.host.shell.is_empty());
}

#[test]
fn sync_transfers_the_current_remote_dir() {
    let mut f = fixture();
    let root = f.root.clone();
    let (cache, _tool) = attach(&mut f);
    f.host.open(&mut f.controller, &cache.join("gdrive:"));
    let docs = cache.join("gdrive:/docs");
    let local = shell_quote(&docs.to_string_lossy());
    f.host.open(&mut f.controller, &docs);

    f.controller.sync_remote(&mut f.host, SyncDirection::Up);
    let (up, up_job) = f.host.jobs.last().cloned().expect("upload job");
    assert_eq!(up, format!("rclone sync {local} gdrive:docs --min-size 1B"));

    f.controller.sync_remote(&mut f.host, SyncDirection::Down);
    let (down, _) = f.host.jobs.last().cloned().expect("download job");
    assert_eq!(down, format!("rclone sync gdrive:docs {local}"));

    let output = JobOutput { status: 0, stdout: String::new(), stderr: String::new() };
    f.controller.on_job_finished(&mut f.host, up_job, output);
    assert!(f.host.errors.is_empty(), "{:?}", f.host.errors);

    // nothing to sync outside the mirror
    let jobs = f.host.jobs.len();
    f.host.open(&mut f.controller, &root.join("dir"));
    f.controller.sync_remote(&mut f.host, SyncDirection::Up);
    assert_eq!(f.host.jobs.len(), jobs);
    assert_eq!(f.host.echoes.last().map(String::as_str), Some("Not a remote directory"));
}
