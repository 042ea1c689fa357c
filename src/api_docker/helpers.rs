/// Things regarding the docker API socket
pub mod docker_socket {
    use std::sync::{LazyLock, OnceLock};

    use stacked_errors::{Result, StackableErr};

    /// This acquires a process-wide unified `bollard::Docker` handle
    pub async fn get_or_init_default_docker_instance() -> Result<bollard::Docker> {
        static DOCKER_SOCKET: OnceLock<bollard::Docker> = OnceLock::new();
        static EXEC_LOCK: LazyLock<tokio::sync::Mutex<()>> = LazyLock::new(Default::default);

        // this has a fast path with a slow path that is careful to not block the
        // process
        if let Some(docker_instance) = DOCKER_SOCKET.get() {
            Ok(docker_instance.clone())
        } else {
            let _exec_lock = EXEC_LOCK.lock().await;

            if let Some(docker_instance) = DOCKER_SOCKET.get() {
                Ok(docker_instance.clone())
            } else {
                let docker_socket = tokio::task::spawn_blocking(|| {
                    bollard::Docker::connect_with_defaults().stack()
                })
                .await
                .stack()??;

                let _ = DOCKER_SOCKET.set(docker_socket);

                Ok(DOCKER_SOCKET.get().unwrap().clone())
            }
        }
    }
}
