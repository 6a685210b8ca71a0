// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! End-to-end scenarios: each builds a small model, commits, and checks the
//! driver call sequence or the reported problems.

mod common;

use common::{commit_ok, commit_rejected, ctx, record, Call};
use net::mac::Mac;
use pretty_assertions::assert_eq;
use trellis_model::problem::ProblemKind;
use trellis_model::Lifecycle;

#[test]
fn single_host_direct_net() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let settings = ctx.settings_direct().unwrap();
    let log = record(&mut ctx, settings);

    let net = ctx.net_new(settings, 0).unwrap();
    ctx.net_set_name(net, "n0").unwrap();
    let phys = ctx.phys_new().unwrap();
    ctx.phys_set_name(phys, "a").unwrap();
    ctx.phys_set_iface(phys, "eth0").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();
    let virt = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(virt, "v0").unwrap();
    ctx.virt_set_mac(virt, Mac([0, 0, 0, 0, 0, 1])).unwrap();
    ctx.virt_connect(virt, phys, "tap0").unwrap();

    commit_ok(&mut ctx);
    assert_eq!(
        log.take(),
        vec![
            Call::CreatePa {
                phys: "a".to_string(),
                net: "n0".to_string()
            },
            Call::AddVirt {
                virt: "v0".to_string()
            },
        ]
    );
}

#[test]
fn cross_host_vxlan_static() {
    let mut ctx = ctx(&[("eth0", 2)]);
    let settings = ctx.settings_vxlan_static(0).unwrap();
    let log = record(&mut ctx, settings);

    let net = ctx.net_new(settings, 100).unwrap();
    ctx.net_set_name(net, "overlay").unwrap();

    let local = ctx.phys_new().unwrap();
    ctx.phys_set_name(local, "a").unwrap();
    ctx.phys_set_iface(local, "eth0").unwrap();
    ctx.phys_set_ip(local, "10.0.0.1".parse().unwrap()).unwrap();
    ctx.phys_claim_local(local).unwrap();
    ctx.phys_attach(local, net).unwrap();

    let remote = ctx.phys_new().unwrap();
    ctx.phys_set_name(remote, "b").unwrap();
    ctx.phys_set_ip(remote, "10.0.0.2".parse().unwrap()).unwrap();
    ctx.phys_attach(remote, net).unwrap();

    let virt_b = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(virt_b, "vb").unwrap();
    ctx.virt_set_mac(virt_b, Mac([0, 0, 0, 0, 0, 2])).unwrap();
    ctx.virt_connect(virt_b, remote, "tap7").unwrap();

    commit_ok(&mut ctx);
    assert_eq!(
        log.take(),
        vec![
            Call::CreatePa {
                phys: "a".to_string(),
                net: "overlay".to_string()
            },
            Call::AddRemotePa {
                local: "a".to_string(),
                peer: "b".to_string()
            },
            Call::AddRemoteVirt {
                virt: "vb".to_string()
            },
        ]
    );
}

#[test]
fn duplicate_mac_is_rejected() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10), ("tap1", 11)]);
    let settings = ctx.settings_direct().unwrap();
    let log = record(&mut ctx, settings);

    let net = ctx.net_new(settings, 0).unwrap();
    let phys = ctx.phys_new().unwrap();
    ctx.phys_set_iface(phys, "eth0").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();

    let mac = Mac([2, 0, 0, 0, 0, 7]);
    let one = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(one, "one").unwrap();
    ctx.virt_set_mac(one, mac).unwrap();
    ctx.virt_connect(one, phys, "tap0").unwrap();
    let two = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(two, "two").unwrap();
    ctx.virt_set_mac(two, mac).unwrap();
    ctx.virt_connect(two, phys, "tap1").unwrap();

    let problems = commit_rejected(&mut ctx);
    assert!(log.is_empty(), "validation failure must not reach drivers");
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, ProblemKind::VirtDupAttr);
    let shown = problems[0].to_string();
    assert!(shown.contains("one") && shown.contains("two"), "{shown}");
}

#[test]
fn duplicate_vnet_id_is_rejected() {
    let mut ctx = ctx(&[]);
    let settings = ctx.settings_vlan().unwrap();
    let first = ctx.net_new(settings, 42).unwrap();
    ctx.net_set_name(first, "left").unwrap();
    let second = ctx.net_new(settings, 42).unwrap();
    ctx.net_set_name(second, "right").unwrap();

    let problems = commit_rejected(&mut ctx);
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, ProblemKind::NetDupId);
}

#[test]
fn oversized_vnet_id_is_rejected() {
    let mut ctx = ctx(&[]);
    let settings = ctx.settings_vlan().unwrap();
    // 5000 does not fit a 12-bit VLAN id
    let net = ctx.net_new(settings, 5000).unwrap();
    ctx.net_set_name(net, "wide").unwrap();

    let problems = commit_rejected(&mut ctx);
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, ProblemKind::NetBadId);

    let fits = ctx.net_new(settings, 4095).unwrap();
    ctx.net_set_name(fits, "narrow").unwrap();
    ctx.net_free(net).unwrap();
    commit_ok(&mut ctx);
}

#[test]
fn implicit_attachment_is_flagged() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let settings = ctx.settings_direct().unwrap();
    let net = ctx.net_new(settings, 0).unwrap();
    let phys = ctx.phys_new().unwrap();
    ctx.phys_set_iface(phys, "eth0").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    // no phys_attach: connecting creates an implicit attachment
    let virt = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(virt, "v").unwrap();
    ctx.virt_connect(virt, phys, "tap0").unwrap();

    let attachment = ctx.find_attachment(net, phys).expect("implicit attachment");
    assert!(!ctx.attachment(attachment).unwrap().explicitly_attached());

    let problems = commit_rejected(&mut ctx);
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, ProblemKind::PhysNotAttached);
}

#[test]
fn unresolvable_virt_interface_is_flagged() {
    let mut ctx = ctx(&[("eth0", 2)]);
    let settings = ctx.settings_direct().unwrap();
    let net = ctx.net_new(settings, 0).unwrap();
    let phys = ctx.phys_new().unwrap();
    ctx.phys_set_iface(phys, "eth0").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();
    let virt = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(virt, "v").unwrap();
    ctx.virt_connect(virt, phys, "tap-missing").unwrap();

    let problems = commit_rejected(&mut ctx);
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, ProblemKind::VirtNoIf);
}

#[test]
fn mac_change_renews_the_virt() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let settings = ctx.settings_direct().unwrap();
    let log = record(&mut ctx, settings);

    let net = ctx.net_new(settings, 0).unwrap();
    let phys = ctx.phys_new().unwrap();
    ctx.phys_set_name(phys, "a").unwrap();
    ctx.phys_set_iface(phys, "eth0").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();
    let virt = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(virt, "v").unwrap();
    ctx.virt_set_mac(virt, Mac([2, 0, 0, 0, 0, 1])).unwrap();
    ctx.virt_connect(virt, phys, "tap0").unwrap();
    commit_ok(&mut ctx);
    log.take();

    ctx.virt_set_mac(virt, Mac([2, 0, 0, 0, 0, 9])).unwrap();
    assert_eq!(ctx.virt(virt).unwrap().state(), Lifecycle::Renew);

    commit_ok(&mut ctx);
    assert_eq!(
        log.take(),
        vec![
            Call::RemoveVirt {
                virt: "v".to_string()
            },
            Call::AddVirt {
                virt: "v".to_string()
            },
        ]
    );
    assert_eq!(ctx.virt(virt).unwrap().state(), Lifecycle::Ok);
}

#[test]
fn phys_attribute_change_rebuilds_its_attachment() {
    let mut ctx = ctx(&[("eth0", 2), ("eth1", 3), ("tap0", 10)]);
    let settings = ctx.settings_direct().unwrap();
    let log = record(&mut ctx, settings);

    let net = ctx.net_new(settings, 0).unwrap();
    ctx.net_set_name(net, "n").unwrap();
    let phys = ctx.phys_new().unwrap();
    ctx.phys_set_name(phys, "a").unwrap();
    ctx.phys_set_iface(phys, "eth0").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();
    let virt = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(virt, "v").unwrap();
    ctx.virt_connect(virt, phys, "tap0").unwrap();
    commit_ok(&mut ctx);
    log.take();

    // renew propagates phys → attachment → connected virt
    ctx.phys_set_iface(phys, "eth1").unwrap();
    commit_ok(&mut ctx);
    assert_eq!(
        log.take(),
        vec![
            Call::RemoveVirt {
                virt: "v".to_string()
            },
            Call::DestroyPa {
                phys: "a".to_string(),
                net: "n".to_string()
            },
            Call::CreatePa {
                phys: "a".to_string(),
                net: "n".to_string()
            },
            Call::AddVirt {
                virt: "v".to_string()
            },
        ]
    );
}

#[test]
fn cleanup_tears_everything_down_in_reverse() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let settings = ctx.settings_vxlan_static(0).unwrap();
    let log = record(&mut ctx, settings);

    let net = ctx.net_new(settings, 7).unwrap();
    ctx.net_set_name(net, "n").unwrap();
    let local = ctx.phys_new().unwrap();
    ctx.phys_set_name(local, "a").unwrap();
    ctx.phys_set_iface(local, "eth0").unwrap();
    ctx.phys_set_ip(local, "10.0.0.1".parse().unwrap()).unwrap();
    ctx.phys_claim_local(local).unwrap();
    ctx.phys_attach(local, net).unwrap();
    let remote = ctx.phys_new().unwrap();
    ctx.phys_set_name(remote, "b").unwrap();
    ctx.phys_set_ip(remote, "10.0.0.2".parse().unwrap()).unwrap();
    ctx.phys_attach(remote, net).unwrap();
    let virt = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(virt, "vb").unwrap();
    ctx.virt_connect(virt, remote, "tap7").unwrap();
    commit_ok(&mut ctx);
    log.take();

    ctx.cleanup(|problem| panic!("cleanup problem: {problem}"))
        .unwrap();
    assert!(ctx.is_empty());
    assert_eq!(
        log.take(),
        vec![
            Call::RemoveRemoteVirt {
                virt: "vb".to_string()
            },
            Call::RemoveRemotePa {
                local: "a".to_string(),
                peer: "b".to_string()
            },
            Call::DestroyPa {
                phys: "a".to_string(),
                net: "n".to_string()
            },
        ]
    );
}
