// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Namespaced mailbox message bus: bounded rings, FIFO and fan-out delivery
//! (spec §4.3).

pub mod manager;
pub mod name;

pub use manager::{
    DescriptorId, HandleId, MailboxManager, Message, PeekInfo, RecvOutcome, SendOutcome, Stats,
};
pub use name::{NameError, Target};

#[cfg(test)]
mod tests {
    use super::*;
    use abi::mailbox::{ModeMask, Namespace};

    #[test]
    fn fifo_wakes_single_waiting_reader_in_order() {
        let mut mgr = MailboxManager::new(64);
        let reader = mgr.open(2, Namespace::Pid, "inbox", Some(2), false).unwrap();
        let sender = mgr.open(1, Namespace::Pid, "inbox", Some(2), true).unwrap();

        // Reader blocks first: nothing queued yet.
        let first = mgr.recv(reader, true).unwrap();
        assert!(first.message.is_none());

        let outcome = mgr.send(sender, 1, b"hello", 0, 0).unwrap();
        assert!(outcome.enqueued);
        assert_eq!(outcome.to_wake, vec![(2, reader)]);

        let got = mgr.recv(reader, false).unwrap().message.unwrap();
        assert_eq!(got.payload, b"hello");
        assert_eq!(got.seq_no, 0);

        // A third PID joining later only sees messages sent after it opens.
        let sender2 = mgr.open(3, Namespace::Pid, "inbox", Some(2), true).unwrap();
        mgr.send(sender2, 3, b"again", 0, 0).unwrap();
        let got2 = mgr.recv(reader, false).unwrap().message.unwrap();
        assert_eq!(got2.payload, b"again");
        assert_eq!(got2.seq_no, 1);
    }

    #[test]
    fn fanout_drop_marks_overrun_on_all_surviving_readers() {
        let mut mgr = MailboxManager::new(64);
        let cap = 8 + b"first".len() as u32; // room for exactly one message
        mgr.bind(Namespace::App, "bus", None, Some(cap), Some(ModeMask::FANOUT | ModeMask::FANOUT_DROP))
            .unwrap();

        let reader_a = mgr.open(10, Namespace::App, "bus", None, false).unwrap();
        let reader_b = mgr.open(11, Namespace::App, "bus", None, false).unwrap();
        let sender = mgr.open(1, Namespace::App, "bus", None, true).unwrap();

        mgr.send(sender, 1, b"first", 0, 0).unwrap();
        // Second message forces the bounded ring to evict "first" before it
        // has been read by either fan-out reader.
        let outcome = mgr.send(sender, 1, b"second", 0, 0).unwrap();
        assert!(outcome.enqueued);

        for reader in [reader_a, reader_b] {
            let got = mgr.recv(reader, false).unwrap().message.unwrap();
            assert_eq!(got.payload, b"second");
            assert_eq!(got.seq_no, 1);
        }

        let stats = mgr.stats();
        assert_eq!(stats.overruns, 1);
    }

    #[test]
    fn msg_too_large_is_rejected_before_queueing() {
        let mut mgr = MailboxManager::new(8);
        mgr.bind(Namespace::Svc, "log", Some(1), Some(16), None).unwrap();
        let sender = mgr.open(1, Namespace::Svc, "log", Some(1), true).unwrap();
        let err = mgr.send(sender, 1, &[0u8; 32], 0, 0).unwrap_err();
        assert_eq!(err, abi::mailbox::MailboxStatus::MsgTooLarge);
    }

    #[test]
    fn close_reclaims_fanout_backlog_once_last_reader_leaves() {
        let mut mgr = MailboxManager::new(8);
        mgr.bind(Namespace::App, "events", None, Some(64), Some(ModeMask::FANOUT | ModeMask::FANOUT_BLOCK))
            .unwrap();
        let reader = mgr.open(5, Namespace::App, "events", None, false).unwrap();
        let sender = mgr.open(1, Namespace::App, "events", None, true).unwrap();
        mgr.send(sender, 1, b"a", 0, 0).unwrap();

        mgr.close(reader).unwrap();
        let stats = mgr.stats();
        assert_eq!(stats.queue_depth_total, 0);
    }

    #[test]
    fn close_unknown_handle_is_invalid() {
        let mut mgr = MailboxManager::new(4);
        let err = mgr.close(HandleId(999)).unwrap_err();
        assert_eq!(err, abi::mailbox::MailboxStatus::InvalidHandle);
    }

    #[test]
    fn descriptor_pool_exhaustion_is_reported() {
        let mut mgr = MailboxManager::new(1);
        mgr.bind(Namespace::Pid, "a", Some(1), None, None).unwrap();
        let err = mgr.bind(Namespace::Pid, "b", Some(1), None, None).unwrap_err();
        assert_eq!(err, abi::mailbox::MailboxStatus::NoDescriptor);
        assert_eq!(mgr.stats().descriptor_exhaustion, 1);
    }
}
