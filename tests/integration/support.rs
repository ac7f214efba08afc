use std::fs;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub fn new_service(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).expect("create service dir");
    dir
}

pub fn write_plain(dir: &Path, file: &str, contents: &str) {
    fs::write(dir.join(file), contents).expect("write value file");
}

pub fn write_exec(dir: &Path, file: &str, script: &str) {
    use std::io::Write;
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true).mode(0o755);
    let mut f = opts.open(dir.join(file)).expect("create executable");
    writeln!(f, "#!/bin/sh\n{script}").expect("write script");
}

pub fn write_dep(dir: &Path, dep_name: &str) {
    write_plain(dir, &format!("{dep_name}.dep"), "true");
}

pub fn cinit_command(root: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cinit"));
    cmd.arg("-r")
        .arg(root)
        .arg("-g")
        .arg("500")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}
