// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! The engine's structural invariants, checked over small models.

mod common;

use common::{commit_ok, ctx, record, Call};
use net::mac::Mac;
use pretty_assertions::assert_eq;
use tracing_test::traced_test;
use trellis_model::{Context, Error, Lifecycle};

/// A two-host static overlay with one virt on each side.
fn two_host_model(ctx: &mut Context) -> TwoHost {
    let settings = ctx.settings_vxlan_static(0).unwrap();
    let log = record(ctx, settings);
    let net = ctx.net_new(settings, 100).unwrap();
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

    let virt_a = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(virt_a, "va").unwrap();
    ctx.virt_set_mac(virt_a, Mac([2, 0, 0, 0, 0, 1])).unwrap();
    ctx.virt_connect(virt_a, local, "tap0").unwrap();

    let virt_b = ctx.virt_new(net).unwrap();
    ctx.virt_set_name(virt_b, "vb").unwrap();
    ctx.virt_set_mac(virt_b, Mac([2, 0, 0, 0, 0, 2])).unwrap();
    ctx.virt_connect(virt_b, remote, "tap1").unwrap();

    TwoHost {
        log,
        net,
        local,
        remote,
        virt_a,
        virt_b,
    }
}

struct TwoHost {
    log: common::CallLog,
    net: trellis_model::Handle<trellis_model::Net>,
    local: trellis_model::Handle<trellis_model::Phys>,
    remote: trellis_model::Handle<trellis_model::Phys>,
    virt_a: trellis_model::Handle<trellis_model::Virt>,
    virt_b: trellis_model::Handle<trellis_model::Virt>,
}

#[test]
fn every_live_object_settles_to_ok() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let model = two_host_model(&mut ctx);
    commit_ok(&mut ctx);

    assert_eq!(ctx.net(model.net).unwrap().state(), Lifecycle::Ok);
    assert_eq!(ctx.phys(model.local).unwrap().state(), Lifecycle::Ok);
    assert_eq!(ctx.phys(model.remote).unwrap().state(), Lifecycle::Ok);
    assert_eq!(ctx.virt(model.virt_a).unwrap().state(), Lifecycle::Ok);
    assert_eq!(ctx.virt(model.virt_b).unwrap().state(), Lifecycle::Ok);
    for &attachment in ctx.net(model.net).unwrap().attachments() {
        assert_eq!(ctx.attachment(attachment).unwrap().state(), Lifecycle::Ok);
        for &view in ctx.attachment(attachment).unwrap().remote_pas() {
            assert_eq!(ctx.remote_pa(view).unwrap().state(), Lifecycle::Ok);
            for &record in ctx.remote_pa(view).unwrap().remote_virts() {
                assert_eq!(ctx.remote_virt(record).unwrap().state(), Lifecycle::Ok);
            }
        }
    }
}

#[test]
fn connected_virt_is_listed_exactly_once() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let model = two_host_model(&mut ctx);

    // reconnecting through the same pair must not duplicate the entry
    ctx.virt_connect(model.virt_a, model.local, "tap0").unwrap();
    let attachment = ctx
        .find_attachment(model.net, model.local)
        .expect("attachment");
    let listed = ctx
        .attachment(attachment)
        .unwrap()
        .virts()
        .iter()
        .filter(|&&v| v == model.virt_a)
        .count();
    assert_eq!(listed, 1);
    assert_eq!(
        ctx.virt(model.virt_a).unwrap().connected_through(),
        Some(attachment)
    );
}

#[test]
fn names_are_unique_within_a_context() {
    let mut ctx = ctx(&[]);
    let settings = ctx.settings_vlan().unwrap();
    let other_settings = ctx.settings_direct().unwrap();
    ctx.settings_set_name(settings, "kind").unwrap();
    assert!(matches!(
        ctx.settings_set_name(other_settings, "kind"),
        Err(Error::Duplicate(_))
    ));

    let one = ctx.net_new(settings, 1).unwrap();
    let two = ctx.net_new(settings, 2).unwrap();
    ctx.net_set_name(one, "shared").unwrap();
    assert!(matches!(
        ctx.net_set_name(two, "shared"),
        Err(Error::Duplicate(_))
    ));
    assert_eq!(ctx.net_by_name("shared"), Some(one));

    let phys_one = ctx.phys_new().unwrap();
    let phys_two = ctx.phys_new().unwrap();
    ctx.phys_set_name(phys_one, "host").unwrap();
    assert!(matches!(
        ctx.phys_set_name(phys_two, "host"),
        Err(Error::Duplicate(_))
    ));

    // renaming releases the old name
    ctx.net_set_name(one, "renamed").unwrap();
    ctx.net_set_name(two, "shared").unwrap();
}

#[test]
fn detaching_an_empty_attachment_frees_it() {
    let mut ctx = ctx(&[("eth0", 2)]);
    let settings = ctx.settings_direct().unwrap();
    let net = ctx.net_new(settings, 0).unwrap();
    let phys = ctx.phys_new().unwrap();
    ctx.phys_set_iface(phys, "eth0").unwrap();
    ctx.phys_attach(phys, net).unwrap();

    ctx.phys_detach(phys, net).unwrap();
    assert!(ctx.find_attachment(net, phys).is_none());
    assert!(ctx.phys(phys).unwrap().attachments().is_empty());
}

#[test]
fn detaching_keeps_the_attachment_while_virts_remain() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let settings = ctx.settings_direct().unwrap();
    let net = ctx.net_new(settings, 0).unwrap();
    let phys = ctx.phys_new().unwrap();
    ctx.phys_set_iface(phys, "eth0").unwrap();
    ctx.phys_attach(phys, net).unwrap();
    let virt = ctx.virt_new(net).unwrap();
    ctx.virt_connect(virt, phys, "tap0").unwrap();

    ctx.phys_detach(phys, net).unwrap();
    let attachment = ctx.find_attachment(net, phys).expect("still present");
    assert!(!ctx.attachment(attachment).unwrap().explicitly_attached());

    // the last virt going away collects the junction
    ctx.virt_disconnect(virt).unwrap();
    assert!(ctx.find_attachment(net, phys).is_none());
}

#[test]
#[traced_test]
fn commit_is_idempotent() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let model = two_host_model(&mut ctx);
    commit_ok(&mut ctx);
    model.log.take();

    commit_ok(&mut ctx);
    assert_eq!(model.log.take(), Vec::<Call>::new());
}

#[test]
fn driver_calls_follow_the_commit_ordering() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let model = two_host_model(&mut ctx);
    commit_ok(&mut ctx);

    let calls = model.log.take();
    let position = |call: &Call| {
        calls
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("{call:?} missing from {calls:?}"))
    };
    let create = position(&Call::CreatePa {
        phys: "a".to_string(),
        net: "n".to_string(),
    });
    let add_virt = position(&Call::AddVirt {
        virt: "va".to_string(),
    });
    let add_remote_pa = position(&Call::AddRemotePa {
        local: "a".to_string(),
        peer: "b".to_string(),
    });
    let add_remote_virt = position(&Call::AddRemoteVirt {
        virt: "vb".to_string(),
    });
    assert!(create < add_virt, "local pa before local virt");
    assert!(create < add_remote_pa, "local pa before remote views");
    assert!(add_remote_pa < add_remote_virt, "remote pa before remote virt");
    // nothing is ever added for the remote side's local hooks
    assert!(!calls.contains(&Call::AddVirt {
        virt: "vb".to_string()
    }));
}

#[test]
fn freeing_a_committed_virt_decommits_it_on_the_next_commit() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let model = two_host_model(&mut ctx);
    commit_ok(&mut ctx);
    model.log.take();

    ctx.virt_free(model.virt_a).unwrap();
    assert_eq!(ctx.virt(model.virt_a).unwrap().state(), Lifecycle::Delete);

    commit_ok(&mut ctx);
    let calls = model.log.take();
    assert!(calls.contains(&Call::RemoveVirt {
        virt: "va".to_string()
    }));
    // the handle is dead after decommit
    assert!(matches!(ctx.virt(model.virt_a), Err(Error::Gone(_))));
}

#[test]
fn deleted_objects_are_never_repromoted() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let model = two_host_model(&mut ctx);
    commit_ok(&mut ctx);

    ctx.virt_free(model.virt_b).unwrap();
    assert!(matches!(
        ctx.virt_set_mac(model.virt_b, Mac([2, 0, 0, 0, 0, 9])),
        Err(Error::Gone(_))
    ));
    assert!(matches!(
        ctx.virt_connect(model.virt_b, model.remote, "tap1"),
        Err(Error::Gone(_))
    ));
    assert_eq!(ctx.virt(model.virt_b).unwrap().state(), Lifecycle::Delete);
}

#[test]
fn validation_failure_leaves_states_untouched() {
    let mut ctx = ctx(&[("eth0", 2), ("tap0", 10)]);
    let model = two_host_model(&mut ctx);
    commit_ok(&mut ctx);
    model.log.take();

    // renew the phys, then make the model invalid
    ctx.phys_set_iface(model.local, "eth0").unwrap(); // same value, no renew
    ctx.phys_set_ip(model.remote, "10.0.0.1".parse().unwrap())
        .unwrap(); // duplicate ip, and remote is renewed
    let outcome = ctx.commit(|_| {});
    assert!(matches!(outcome, Err(Error::Validate(_))));
    assert!(model.log.is_empty(), "no driver call on failed validation");

    // propagation was reverted: the local side's attachment kept its state
    let attachment = ctx
        .find_attachment(model.net, model.remote)
        .expect("attachment");
    assert_eq!(ctx.attachment(attachment).unwrap().state(), Lifecycle::Ok);
    assert_eq!(ctx.phys(model.remote).unwrap().state(), Lifecycle::Renew);
}
