use shared::models::pool::CloudUnits;
use shared::models::workload::{Rsu, Workload};

/// Round to 3 decimals; cloud units are reported and charged at that
/// granularity.
fn round3(value: f64) -> f64 {
    (value * 1_000.0).round() / 1_000.0
}

/// Map raw hardware units to abstract cloud units.
///
/// Compute is locked to memory: one CU is 2 vCPU with 4 GiB, whichever is
/// scarcer bounds the result. Storage blends both disk tiers, with HDD
/// contributing at the lower rate.
pub fn cloud_units_from_resource_units(rsu: &Rsu) -> (f64, f64) {
    let cu = (rsu.cru as f64 * 2.0).min(rsu.mru) / 4.0;
    let su = rsu.hru / 1_200.0 + rsu.sru / 200.0;
    (round3(cu), round3(su))
}

/// The full per-second draw of a workload, including the network and ipv4
/// units its variant emits.
pub fn cloud_units_for(workload: &Workload) -> anyhow::Result<CloudUnits> {
    let rsu = workload.rsu()?;
    let (cu, su) = cloud_units_from_resource_units(&rsu);
    Ok(CloudUnits {
        cu,
        su,
        nu: workload.network_units(),
        ipv4u: workload.ipv4_units(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::workload::{
        ReservationInfo, Volume, VolumeType, Workload, WorkloadData, WorkloadType,
    };

    #[test]
    fn cloud_units_from_resource_units_table() {
        let cases = [
            (Rsu { cru: 1, mru: 1.0, sru: 0.0, hru: 0.0 }, 0.25, 0.0),
            (Rsu { cru: 2, mru: 4.0, sru: 0.0, hru: 0.0 }, 1.0, 0.0),
            (Rsu { cru: 4, mru: 8.0, sru: 0.0, hru: 0.0 }, 2.0, 0.0),
            // memory beyond the 2:4 lockstep buys nothing
            (Rsu { cru: 4, mru: 64.0, sru: 0.0, hru: 0.0 }, 2.0, 0.0),
            (Rsu { cru: 4, mru: 32.0, sru: 0.0, hru: 0.0 }, 2.0, 0.0),
            (Rsu { cru: 0, mru: 0.0, sru: 120.0, hru: 1_200.0 }, 0.0, 1.6),
            (Rsu { cru: 0, mru: 0.0, sru: 40.0, hru: 1_000.0 }, 0.0, 1.033),
            (Rsu { cru: 0, mru: 0.0, sru: 1_200.0, hru: 0.0 }, 0.0, 6.0),
            (Rsu { cru: 0, mru: 0.0, sru: 0.0, hru: 12_000.0 }, 0.0, 10.0),
        ];

        for (rsu, expected_cu, expected_su) in cases {
            let (cu, su) = cloud_units_from_resource_units(&rsu);
            assert_eq!(cu, expected_cu, "wrong number of cu for {:?}", rsu);
            assert_eq!(su, expected_su, "wrong number of su for {:?}", rsu);
        }
    }

    #[test]
    fn volume_draw_includes_no_network_units() {
        let workload = Workload {
            info: ReservationInfo {
                id: 1,
                node_id: "node-1".to_string(),
                pool_id: 1,
                customer_tid: 42,
                customer_signature: "00".to_string(),
                workload_type: WorkloadType::Volume,
                ..Default::default()
            },
            data: WorkloadData::Volume(Volume {
                size: 1,
                kind: VolumeType::Ssd,
            }),
        };

        let units = cloud_units_for(&workload).unwrap();
        assert_eq!(units.cu, 0.0);
        assert_eq!(units.su, 0.005);
        assert_eq!(units.nu, 0.0);
        assert_eq!(units.ipv4u, 0.0);
    }
}
