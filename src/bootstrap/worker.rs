//! Worker bootstrap
//!
//! Workers only consume what the control plane published: they wait for
//! `control-plane/ip` and a join token, then start the agent service once.

use super::{write_env, BootstrapContext, BootstrapOutcome, HookStage, WaitReason};
use crate::distro::{JoinInfo, NodeDescriptor};
use crate::error::{Error, Result};
use crate::net::guess_interface;
use crate::role::{Role, CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY, TOKEN_KEY};

pub(super) async fn run(ctx: &BootstrapContext) -> Result<BootstrapOutcome> {
    let role = Role::Worker;

    ctx.publish_static_role().await?;

    if ctx.sentinel.exists() {
        tracing::debug!("Worker already configured");
        return Ok(BootstrapOutcome::AlreadyConfigured);
    }

    let Some(control_plane_ip) = ctx.ledger.get(CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY).await? else {
        tracing::info!("Control plane IP not there yet");
        return Ok(BootstrapOutcome::Waiting(WaitReason::AwaitingControlPlaneIp));
    };

    let distro = ctx.distro.as_ref();
    let Some(token) = ctx.ledger.get(distro.token_bucket(role), TOKEN_KEY).await? else {
        tracing::info!("Join token not there yet");
        return Ok(BootstrapOutcome::Waiting(WaitReason::AwaitingJoinToken));
    };

    let iface = if ctx.config.p2p.use_vpn_with_kubernetes {
        Some(ctx.config.p2p.interface.clone())
    } else {
        guess_interface(&ctx.config, ctx.addresses.as_ref())
    };
    let Some(ip) = iface.as_deref().and_then(|i| ctx.addresses.interface_ip(i)) else {
        tracing::info!("Worker doesn't have an IP yet");
        return Ok(BootstrapOutcome::Waiting(WaitReason::AwaitingIp));
    };

    let join = JoinInfo::new(&token, &control_plane_ip);
    let node = NodeDescriptor {
        uuid: ctx.uuid.clone(),
        role,
        iface_ip: Some(ip.clone()),
        ip,
        iface,
    };
    tracing::info!(
        "Configuring {} worker on {}, joining {}",
        distro.name(),
        node.ip,
        join.control_plane_ip
    );

    ctx.run_hook(HookStage::Before, role).await;

    distro.setup_worker(&join).await?;

    let service = ctx.services.service(distro.service_name(role));
    write_env(&service.env_file(), &distro.generate_env(&node, Some(&join))).await?;

    let args = distro.generate_args(&node, Some(&join)).await?;
    let binary = distro
        .binary()
        .ok_or_else(|| Error::BinaryNotFound(distro.name().to_string()))?;
    let command_line = format!("{} {} {}", binary.display(), distro.subcommand(role), args.join(" "));

    service.override_cmd(command_line.trim_end()).await?;
    service.start().await?;
    service.enable().await?;
    tracing::info!("Started {}", service.name());

    ctx.run_hook(HookStage::After, role).await;

    ctx.sentinel.create().await?;
    Ok(BootstrapOutcome::Configured)
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::super::bootstrap;
    use super::*;
    use crate::ledger::{Ledger, LedgerOp};
    use crate::net::StaticAddresses;
    use crate::role::{NODE_TOKEN_BUCKET, ROLE_BUCKET};
    use crate::service::ServiceCall;

    fn addresses() -> StaticAddresses {
        StaticAddresses::new()
            .with("lo", "127.0.0.1")
            .with("eth0", "192.168.1.7")
            .with("edgevpn0", "10.1.0.7")
    }

    #[tokio::test]
    async fn test_blocks_without_control_plane_ip() {
        let fixture = Fixture::new();
        fixture.ledger.set(NODE_TOKEN_BUCKET, TOKEN_KEY, "secret").await.unwrap();
        fixture.ledger.clear_writes().await;
        let ctx = fixture.context(fixture.config(), "node-c", addresses());

        let outcome = bootstrap(&ctx, Role::Worker).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Waiting(WaitReason::AwaitingControlPlaneIp));
        assert!(fixture.ledger.writes().await.is_empty());
        assert!(fixture.services.calls().await.is_empty());
        assert!(!ctx.sentinel.exists());
    }

    #[tokio::test]
    async fn test_blocks_without_token() {
        let fixture = Fixture::new();
        fixture
            .ledger
            .set(CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY, "10.1.0.1")
            .await
            .unwrap();
        let ctx = fixture.context(fixture.config(), "node-c", addresses());

        let outcome = bootstrap(&ctx, Role::Worker).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Waiting(WaitReason::AwaitingJoinToken));
        assert!(fixture.services.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_worker_joins() {
        let fixture = Fixture::new();
        fixture
            .ledger
            .set(CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY, "10.1.0.1")
            .await
            .unwrap();
        fixture.ledger.set(NODE_TOKEN_BUCKET, TOKEN_KEY, "secret\n").await.unwrap();
        let ctx = fixture.context(fixture.config(), "node-c", addresses());

        let outcome = bootstrap(&ctx, Role::Worker).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Configured);
        assert!(ctx.sentinel.exists());

        let bin = fixture.dir.path().join("usr/bin/k3s");
        assert_eq!(
            fixture.services.calls().await,
            vec![
                ServiceCall::Override {
                    service: "k3s-agent".into(),
                    command: format!(
                        "{} agent --with-node-id --node-ip=10.1.0.7 --flannel-iface=edgevpn0",
                        bin.display()
                    ),
                },
                ServiceCall::Start("k3s-agent".into()),
                ServiceCall::Enable("k3s-agent".into()),
            ]
        );
        assert_eq!(
            fixture.read("etc/systemd/system/k3s-agent.service.env"),
            "K3S_TOKEN=\"secret\"\nK3S_URL=\"https://10.1.0.1:6443\"\n"
        );

        // A second pass is a no-op
        let outcome = bootstrap(&ctx, Role::Worker).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::AlreadyConfigured);
        assert_eq!(fixture.services.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_without_vpn_uses_guessed_interface() {
        let fixture = Fixture::new();
        fixture
            .ledger
            .set(CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY, "10.1.0.1")
            .await
            .unwrap();
        fixture.ledger.set(NODE_TOKEN_BUCKET, TOKEN_KEY, "secret").await.unwrap();
        let mut config = fixture.config();
        config.p2p.use_vpn_with_kubernetes = false;
        let ctx = fixture.context(config, "node-c", addresses());

        bootstrap(&ctx, Role::Worker).await.unwrap();

        let calls = fixture.services.calls().await;
        let ServiceCall::Override { command, .. } = &calls[0] else {
            panic!("expected an override first, got {:?}", calls);
        };
        assert!(command.ends_with("agent --with-node-id --node-ip=192.168.1.7"));
    }

    #[tokio::test]
    async fn test_waits_for_own_ip() {
        let fixture = Fixture::new();
        fixture
            .ledger
            .set(CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY, "10.1.0.1")
            .await
            .unwrap();
        fixture.ledger.set(NODE_TOKEN_BUCKET, TOKEN_KEY, "secret").await.unwrap();
        let ctx = fixture.context(fixture.config(), "node-c", StaticAddresses::new().with("eth0", "192.168.1.7"));

        let outcome = bootstrap(&ctx, Role::Worker).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Waiting(WaitReason::AwaitingIp));
    }

    #[tokio::test]
    async fn test_static_worker_role_published_while_waiting() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.p2p.role = Some("worker".into());
        let ctx = fixture.context(config, "node-c", addresses());

        bootstrap(&ctx, Role::Worker).await.unwrap();
        assert_eq!(
            fixture.ledger.writes().await,
            vec![LedgerOp::set(ROLE_BUCKET, "node-c", "worker")]
        );
    }
}
