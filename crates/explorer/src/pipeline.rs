use shared::models::workload::{NextAction, Workload};

/// Advance a workload through the signature-driven part of its lifecycle:
///
/// ```text
/// Create ──► Sign ──all signers?──► Pay
/// any pre-terminal state ──delete threshold met──► Delete
/// ```
///
/// The `Pay -> Deploy` edge needs the capacity planner and stays with the
/// caller. Returns true when the action changed.
pub fn progress(workload: &mut Workload) -> bool {
    let before = workload.info.next_action;

    if delete_threshold_met(workload)
        && matches!(
            before,
            NextAction::Create | NextAction::Sign | NextAction::Pay | NextAction::Deploy
        )
    {
        workload.info.next_action = NextAction::Delete;
        return true;
    }

    loop {
        let info = &workload.info;
        let next = match info.next_action {
            NextAction::Create => NextAction::Sign,
            NextAction::Sign
                if info
                    .signing_request_provision
                    .satisfied_by(&info.signatures_provision) =>
            {
                NextAction::Pay
            }
            _ => break,
        };
        workload.info.next_action = next;
    }

    workload.info.next_action != before
}

/// The delete quorum only counts once somebody actually asked for deletion.
pub fn delete_threshold_met(workload: &Workload) -> bool {
    let info = &workload.info;
    !info.signatures_delete.is_empty()
        && info
            .signing_request_delete
            .satisfied_by(&info.signatures_delete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::workload::{
        ReservationInfo, SigningRequest, SigningSignature, Volume, VolumeType, WorkloadData,
        WorkloadType,
    };

    fn workload_with(provision: SigningRequest) -> Workload {
        Workload {
            info: ReservationInfo {
                id: 1,
                node_id: "node-1".to_string(),
                pool_id: 1,
                customer_tid: 42,
                signing_request_provision: provision,
                workload_type: WorkloadType::Volume,
                ..Default::default()
            },
            data: WorkloadData::Volume(Volume {
                size: 1,
                kind: VolumeType::Ssd,
            }),
        }
    }

    fn signature(tid: i64) -> SigningSignature {
        SigningSignature {
            tid,
            signature: "00".to_string(),
            epoch: 0,
        }
    }

    #[test]
    fn no_signers_goes_straight_to_pay() {
        let mut workload = workload_with(SigningRequest::default());
        assert!(progress(&mut workload));
        assert_eq!(workload.info.next_action, NextAction::Pay);
    }

    #[test]
    fn waits_in_sign_until_quorum() {
        let mut workload = workload_with(SigningRequest {
            signers: vec![7, 9],
            quorum_min: 2,
        });
        progress(&mut workload);
        assert_eq!(workload.info.next_action, NextAction::Sign);

        workload.info.signatures_provision.push(signature(7));
        assert!(!progress(&mut workload));
        assert_eq!(workload.info.next_action, NextAction::Sign);

        workload.info.signatures_provision.push(signature(9));
        assert!(progress(&mut workload));
        assert_eq!(workload.info.next_action, NextAction::Pay);
    }

    #[test]
    fn delete_threshold_overrides_deploy() {
        let mut workload = workload_with(SigningRequest::default());
        workload.info.next_action = NextAction::Deploy;
        workload.info.signing_request_delete = SigningRequest {
            signers: vec![42],
            quorum_min: 1,
        };

        // nobody asked yet
        assert!(!progress(&mut workload));
        assert_eq!(workload.info.next_action, NextAction::Deploy);

        workload.info.signatures_delete.push(signature(42));
        assert!(progress(&mut workload));
        assert_eq!(workload.info.next_action, NextAction::Delete);
    }

    #[test]
    fn terminal_states_stay_put() {
        for terminal in [NextAction::Deleted, NextAction::Invalid] {
            let mut workload = workload_with(SigningRequest::default());
            workload.info.next_action = terminal;
            workload.info.signatures_delete.push(signature(42));
            assert!(!progress(&mut workload));
            assert_eq!(workload.info.next_action, terminal);
        }
    }
}
