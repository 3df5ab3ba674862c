use crate::*;

/// A peer that goes away is noticed, its routes are cleared, and a refresh
/// after it comes back on a new address relinks the mesh.
#[tokio::test]
async fn test_peer_restart_relinks() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;
    link(&alpha, &beta).await?;
    beta.routes.add_entry("players", "Bob");
    wait_until("alpha learns Bob", || {
        alpha.routes.get_location("players", "Bob").is_some()
    })
    .await?;

    beta.stop().await;
    wait_until("alpha notices beta left", || !alpha.manager.is_connected("beta")).await?;
    assert_eq!(alpha.routes.get_location("players", "Bob"), None);
    assert!(alpha.manager.is_empty());

    let beta = Node::start("beta").await?;
    beta.trusts(&alpha);
    alpha.trusts(&beta);
    assert_eq!(alpha.manager.check_trusted(&alpha.trust), 1);
    wait_until("relinked", || {
        alpha.manager.is_connected("beta") && beta.manager.is_connected("alpha")
    })
    .await?;
    wait_until("beta's server entry is back", || {
        alpha.routes.get_location("servers", "beta").is_some()
    })
    .await?;

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}

/// Both ends dialling at once settle on a single link.
#[tokio::test]
async fn test_crossed_dials_settle_on_one_link() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;
    alpha.trusts(&beta);
    beta.trusts(&alpha);

    alpha.manager.check_trusted(&alpha.trust);
    beta.manager.check_trusted(&beta.trust);

    wait_until("one link each way", || {
        alpha.manager.is_connected("beta") && beta.manager.is_connected("alpha")
    })
    .await?;
    // Let the losing link finish closing.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(alpha.manager.is_connected("beta"));
    assert!(beta.manager.is_connected("alpha"));
    assert_eq!(alpha.manager.len(), 1);
    assert_eq!(beta.manager.len(), 1);

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}
