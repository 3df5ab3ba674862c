use crate::*;

/// Entries added after the link is up reach the peer.
#[tokio::test]
async fn test_local_entries_replicate() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;
    link(&alpha, &beta).await?;

    alpha
        .routes
        .add_located_entry("players", "Bob", Some("world".into()));
    wait_until("beta learns Bob", || {
        beta.routes.get_location("players", "Bob").as_deref() == Some("alpha")
    })
    .await?;
    let entry = beta.routes.get_entry("players", "Bob").context("Bob missing")?;
    assert_eq!(entry.location.as_deref(), Some("world"));

    alpha.routes.delete_entry("players", "Bob");
    wait_until("beta forgets Bob", || {
        beta.routes.get_location("players", "Bob").is_none()
    })
    .await?;

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}

/// Entries that existed before the link are synced when it comes up.
#[tokio::test]
async fn test_existing_entries_sync_on_connect() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;

    for player in ["Alice", "Bob", "Carol"] {
        alpha.routes.add_entry("players", player);
    }
    beta.routes.add_entry("worlds", "nether");

    link(&alpha, &beta).await?;

    wait_until("beta has all of alpha's players", || {
        beta.routes.copy_key_set("players").len() == 3
    })
    .await?;
    wait_until("alpha has beta's world", || {
        alpha.routes.get_location("worlds", "nether").as_deref() == Some("beta")
    })
    .await?;

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}

/// Dropping a table withdraws only the sender's entries.
#[tokio::test]
async fn test_drop_table_withdraws_own_entries() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;
    link(&alpha, &beta).await?;

    alpha.routes.add_entry("players", "Bob");
    beta.routes.add_entry("players", "Eve");
    wait_until("both players known on beta", || {
        beta.routes.copy_key_set("players").len() == 2
    })
    .await?;

    alpha.routes.delete_table("players");
    wait_until("Bob withdrawn on beta", || {
        beta.routes.get_location("players", "Bob").is_none()
    })
    .await?;
    assert_eq!(beta.routes.get_location("players", "Eve").as_deref(), Some("beta"));

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}

/// Tearing a link down clears the routes owned by the far side, once, on
/// both ends, and leaves everybody else's entries alone.
#[tokio::test]
async fn test_disconnect_clears_routes_through_peer() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;
    let gamma = Node::start("gamma").await?;
    link(&alpha, &beta).await?;
    link(&alpha, &gamma).await?;

    beta.routes.add_entry("players", "Bob");
    gamma.routes.add_entry("players", "Gus");
    wait_until("alpha knows both players", || {
        alpha.routes.copy_key_set("players").len() == 2
    })
    .await?;

    let outcome = alpha.manager.delete_connection("beta").await;
    assert_eq!(outcome.to_string(), "removed");

    assert_eq!(alpha.routes.get_location("players", "Bob"), None);
    assert_eq!(alpha.routes.get_location("servers", "beta"), None);
    assert_eq!(alpha.routes.get_location("players", "Gus").as_deref(), Some("gamma"));

    wait_until("beta notices the close", || !beta.manager.is_connected("alpha")).await?;
    wait_until("beta clears alpha's entries", || {
        beta.routes.get_location("servers", "alpha").is_none()
    })
    .await?;

    alpha.stop().await;
    beta.stop().await;
    gamma.stop().await;
    Ok(())
}
