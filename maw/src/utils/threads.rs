use std::thread::{self, JoinHandle};

/// Spawns a thread carrying `name`, which shows up in panics and in the process thread list.
pub fn spawn_named_thread<F, T, S>(name: S, f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
    S: ToString,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .expect("spawning a thread without stack size should not fail")
}
