#![allow(dead_code)]

use std::error::Error;

pub use privhelper_test_utils::{init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Current uid/gid as an authority subject.
pub fn current_subject() -> privhelper::authority::Subject {
    privhelper::authority::Subject {
        uid: nix::unistd::Uid::current().as_raw(),
        gid: nix::unistd::Gid::current().as_raw(),
        pid: Some(std::process::id() as i32),
    }
}
