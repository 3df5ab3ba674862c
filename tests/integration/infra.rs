use crate::*;

use tokio::io::AsyncReadExt;

/// Two nodes find each other over loopback and exchange server entries.
#[tokio::test]
async fn test_two_nodes_link() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;

    link(&alpha, &beta).await?;

    wait_until("alpha sees beta's server entry", || {
        alpha.routes.get_location("servers", "beta").as_deref() == Some("beta")
    })
    .await?;
    wait_until("beta sees alpha's server entry", || {
        beta.routes.get_location("servers", "alpha").as_deref() == Some("alpha")
    })
    .await?;

    assert_eq!(alpha.manager.len(), 1);
    assert_eq!(beta.manager.len(), 1);

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}

/// A peer that is not in the trust store is refused at the handshake.
#[tokio::test]
async fn test_untrusted_peer_refused() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;

    // Only alpha trusts beta.
    alpha.trusts(&beta);
    alpha.manager.check_trusted(&alpha.trust);

    tokio::time::sleep(Duration::from_millis(300)).await;
    wait_until("alpha drops the refused link", || {
        !alpha.manager.is_connected("beta")
    })
    .await?;
    assert!(beta.manager.is_empty());
    assert_eq!(alpha.routes.get_location("servers", "beta"), None);

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}

/// A raw socket that never says hello is cut off by the handshake timeout.
#[tokio::test]
async fn test_silent_socket_times_out() -> Result<()> {
    let alpha = Node::start("alpha").await?;

    let mut socket = tokio::net::TcpStream::connect(alpha.addr).await?;
    let mut buf = Vec::new();
    // Alpha's own hello arrives, then the socket closes after the timeout.
    let read = tokio::time::timeout(Duration::from_secs(5), socket.read_to_end(&mut buf)).await;
    assert!(read.is_ok(), "handshake did not time out");
    assert!(!buf.is_empty());
    assert!(alpha.manager.is_empty());

    alpha.stop().await;
    Ok(())
}
