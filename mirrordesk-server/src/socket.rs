//! Named local socket the host reaches through a port tunnel.
//!
//! On Linux and Android the name lives in the abstract namespace, so
//! nothing is left on disk. Elsewhere a socket file named after it is
//! created in the temp directory.

use std::io;

use tokio::net::UnixListener;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn bind(name: &str) -> io::Result<UnixListener> {
    #[cfg(target_os = "android")]
    use std::os::android::net::SocketAddrExt;
    #[cfg(target_os = "linux")]
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    let listener = std::os::unix::net::UnixListener::bind_addr(&addr)?;
    listener.set_nonblocking(true)?;
    UnixListener::from_std(listener)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn bind(name: &str) -> io::Result<UnixListener> {
    let path = std::env::temp_dir().join(format!("{name}.sock"));
    // A stale socket file from an earlier run blocks bind.
    let _ = std::fs::remove_file(&path);
    UnixListener::bind(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[cfg(any(target_os = "linux", target_os = "android"))]
    async fn connect(name: &str) -> io::Result<tokio::net::UnixStream> {
        #[cfg(target_os = "android")]
        use std::os::android::net::SocketAddrExt;
        #[cfg(target_os = "linux")]
        use std::os::linux::net::SocketAddrExt;

        let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
        let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
        stream.set_nonblocking(true)?;
        tokio::net::UnixStream::from_std(stream)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    async fn connect(name: &str) -> io::Result<tokio::net::UnixStream> {
        tokio::net::UnixStream::connect(std::env::temp_dir().join(format!("{name}.sock"))).await
    }

    #[tokio::test]
    async fn bound_name_accepts_a_client() {
        let name = format!("mirrordesk_test_{}", std::process::id());
        let listener = bind(&name).unwrap();

        let client = tokio::spawn({
            let name = name.clone();
            async move {
                let mut s = connect(&name).await.unwrap();
                s.write_all(b"hi").await.unwrap();
            }
        });

        let (mut server_side, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 2];
        server_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        client.await.unwrap();
    }
}
