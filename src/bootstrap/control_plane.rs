//! Control-plane bootstrap
//!
//! Waits for a node IP (and, for HA replicas, the cluster-init node's
//! token and address), renders the distro service, starts it and
//! publishes the join material dependents wait on.

use super::{write_env, BootstrapContext, BootstrapOutcome, HookStage, WaitReason};
use crate::distro::{JoinInfo, NodeDescriptor};
use crate::error::{Error, Result};
use crate::kubevip::KubeVip;
use crate::net::{guess_interface, resolve_self_ip};
use crate::role::{Role, CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY, IP_BUCKET, ROLE_BUCKET, TOKEN_KEY};

pub(super) async fn run(ctx: &BootstrapContext, role: Role) -> Result<BootstrapOutcome> {
    tracing::debug!("Control plane bootstrap ({})", role);

    let Some(ip) = resolve_self_ip(&ctx.config, ctx.addresses.as_ref()) else {
        return Ok(BootstrapOutcome::Waiting(WaitReason::AwaitingIp));
    };

    if let Err(e) = ctx.ledger.set(IP_BUCKET, &ctx.uuid, &ip).await {
        tracing::error!("Failed to publish node IP: {}", e);
    }

    ctx.publish_static_role().await?;

    let iface = guess_interface(&ctx.config, ctx.addresses.as_ref());
    let iface_ip = iface.as_deref().and_then(|i| ctx.addresses.interface_ip(i));
    let node = NodeDescriptor {
        uuid: ctx.uuid.clone(),
        role,
        ip,
        iface,
        iface_ip,
    };

    if ctx.sentinel.exists() {
        tracing::info!("Control plane already configured, propagating data");
        propagate(ctx, &node, true).await?;
        return Ok(BootstrapOutcome::AlreadyConfigured);
    }

    let join = if role.is_ha_join() {
        match peer_info(ctx, role).await? {
            Some(join) => Some(join),
            None => return Ok(BootstrapOutcome::Waiting(WaitReason::AwaitingPeerInfo)),
        }
    } else {
        None
    };

    let distro = ctx.distro.as_ref();
    tracing::info!("Configuring {} {} on {}", distro.name(), role, node.ip);

    let env = distro.generate_env(&node, join.as_ref());

    ctx.run_hook(HookStage::Before, role).await;

    if role.is_ha_join() {
        distro.setup_ha_token(&node, join.as_ref()).await?;
    }

    let service = ctx.services.service(distro.service_name(role));
    write_env(&service.env_file(), &env).await?;

    let args = distro.generate_args(&node, join.as_ref()).await?;

    if ctx.config.kubevip.enable {
        let iface = node
            .iface
            .as_deref()
            .ok_or_else(|| Error::Config("no interface found for kube-vip".into()))?;
        KubeVip::new(&ctx.config).deploy(iface, &node.ip).await?;
    }

    let binary = distro
        .binary()
        .ok_or_else(|| Error::BinaryNotFound(distro.name().to_string()))?;
    let command_line = format!("{} {} {}", binary.display(), distro.subcommand(role), args.join(" "));

    service.override_cmd(command_line.trim_end()).await?;
    service.start().await?;
    service.enable().await?;
    tracing::info!("Started {}", service.name());

    // A replica has nothing to publish beyond its role until the
    // cluster it joined is up
    propagate(ctx, &node, !role.is_ha_join()).await?;

    ctx.run_hook(HookStage::After, role).await;

    ctx.sentinel.create().await?;
    Ok(BootstrapOutcome::Configured)
}

/// Token and address of the cluster-init node, once both are published
async fn peer_info(ctx: &BootstrapContext, role: Role) -> Result<Option<JoinInfo>> {
    let token = ctx
        .ledger
        .get(ctx.distro.token_bucket(role), TOKEN_KEY)
        .await?;
    let Some(token) = token else {
        tracing::info!("Control plane token is not there yet");
        return Ok(None);
    };

    let Some(ip) = ctx.ledger.get(CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY).await? else {
        tracing::info!("Cluster-init IP is not there yet");
        return Ok(None);
    };

    Ok(Some(JoinInfo::new(&token, &ip)))
}

/// Re-publish the role and, when asked, the cluster join material.
/// Individual join-material failures are logged so one missing file does
/// not hide the rest.
async fn propagate(ctx: &BootstrapContext, node: &NodeDescriptor, join_material: bool) -> Result<()> {
    let result = publish(ctx, node, join_material).await;
    ctx.settle().await;
    result
}

async fn publish(ctx: &BootstrapContext, node: &NodeDescriptor, join_material: bool) -> Result<()> {
    ctx.ledger.set(ROLE_BUCKET, &ctx.uuid, node.role.tag()).await?;

    if !join_material {
        return Ok(());
    }

    if let Err(e) = ctx.distro.propagate_data(ctx.ledger.as_ref()).await {
        tracing::error!("Failed to propagate {} data: {}", ctx.distro.name(), e);
    }

    if let Err(e) = ctx
        .ledger
        .set(CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY, &node.ip)
        .await
    {
        tracing::error!("Failed to publish control plane IP: {}", e);
    }

    Ok(())
}
