mod common;

use common::*;
use dspbridge::{
    board::{CacheOp, CacheRecord, MapAttrs},
    config::{DMM_POOL_BASE, DMM_POOL_SIZE},
    proc, DspError, ProcessContext,
};

const HOST_BUF: usize = 0x8000_0000;

#[test]
fn reserve_map_unmap() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::new(1);
    let p = bench.attach(&mut ctx);

    let rsv = p.reserve_memory(0x10000, &mut ctx).unwrap();
    assert_eq!(rsv, DMM_POOL_BASE);
    assert_eq!(ctx.reservations(), &[rsv]);

    let addr = p
        .map(HOST_BUF + 0x1234, 0x100, rsv + 0x1000, MapAttrs::empty(), &mut ctx)
        .unwrap();
    assert_eq!(addr, rsv + 0x1234);
    assert_eq!(ctx.mappings(), &[rsv + 0x1000]);

    let mmu = bench.board.mappings();
    assert_eq!(mmu.len(), 1);
    let (va, entry) = mmu[0];
    assert_eq!(va, rsv + 0x1000);
    assert_eq!(entry.mpu_addr, HOST_BUF + 0x1000);
    assert_eq!(entry.size, 0x1000);
    assert_eq!(entry.attrs, MapAttrs::LITTLE_ENDIAN | MapAttrs::VIRTUAL_ADDR);

    p.unmap(addr, &mut ctx).unwrap();
    assert!(bench.board.mappings().is_empty());
    assert!(ctx.mappings().is_empty());
    assert_eq!(p.unmap(addr, &mut ctx).unwrap_err(), DspError::NotFound);

    p.unreserve_memory(rsv, &mut ctx).unwrap();
    assert!(ctx.reservations().is_empty());
    assert_eq!(bench.device().dmm_stats().total_free, DMM_POOL_SIZE);
    assert_eq!(
        p.unreserve_memory(rsv, &mut ctx).unwrap_err(),
        DspError::NotFound
    );
}

#[test]
fn map_across_page_boundary() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::new(1);
    let p = bench.attach(&mut ctx);

    let rsv = p.reserve_memory(0x4000, &mut ctx).unwrap();
    let addr = p
        .map(
            HOST_BUF + 0xff0,
            0x20,
            rsv,
            MapAttrs::BIG_ENDIAN | MapAttrs::ELEM_SIZE16,
            &mut ctx,
        )
        .unwrap();
    assert_eq!(addr, rsv + 0xff0);

    let (_, entry) = bench.board.mappings()[0];
    assert_eq!(entry.size, 0x2000);
    assert_eq!(
        entry.attrs,
        MapAttrs::BIG_ENDIAN | MapAttrs::ELEM_SIZE16 | MapAttrs::VIRTUAL_ADDR
    );
}

#[test]
fn map_errors() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::new(1);
    let p = bench.attach(&mut ctx);

    let rsv = p.reserve_memory(0x2000, &mut ctx).unwrap();

    // Not reserved.
    assert_eq!(
        p.map(HOST_BUF, 0x1000, rsv + 0x10_0000, MapAttrs::empty(), &mut ctx)
            .unwrap_err(),
        DspError::NotFound
    );
    // Running past the end of the reservation.
    assert_eq!(
        p.map(HOST_BUF, 0x3000, rsv, MapAttrs::empty(), &mut ctx)
            .unwrap_err(),
        DspError::NotFound
    );
    assert_eq!(
        p.map(HOST_BUF, 0, rsv, MapAttrs::empty(), &mut ctx)
            .unwrap_err(),
        DspError::InvalidArg
    );
    assert_eq!(
        p.map(
            HOST_BUF,
            0x1000,
            rsv,
            MapAttrs::LITTLE_ENDIAN | MapAttrs::BIG_ENDIAN,
            &mut ctx
        )
        .unwrap_err(),
        DspError::InvalidArg
    );
    assert_eq!(
        p.map(
            HOST_BUF,
            0x1000,
            rsv,
            MapAttrs::ELEM_SIZE8 | MapAttrs::ELEM_SIZE32,
            &mut ctx
        )
        .unwrap_err(),
        DspError::InvalidArg
    );

    p.map(HOST_BUF, 0x2000, rsv, MapAttrs::empty(), &mut ctx)
        .unwrap();
    assert_eq!(
        p.map(HOST_BUF + 0x4000, 0x1000, rsv + 0x1000, MapAttrs::empty(), &mut ctx)
            .unwrap_err(),
        DspError::NotFound
    );
    assert_eq!(ctx.mappings().len(), 1);
    assert_eq!(bench.board.mappings().len(), 1);
}

#[test]
fn failed_mmu_map_is_rolled_back() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::new(1);
    let p = bench.attach(&mut ctx);

    let rsv = p.reserve_memory(0x1000, &mut ctx).unwrap();
    bench.board.fail_next_map();
    assert_eq!(
        p.map(HOST_BUF, 0x1000, rsv, MapAttrs::empty(), &mut ctx)
            .unwrap_err(),
        DspError::Fail
    );
    assert!(ctx.mappings().is_empty());

    p.map(HOST_BUF, 0x1000, rsv, MapAttrs::empty(), &mut ctx)
        .unwrap();
    assert_eq!(ctx.mappings(), &[rsv]);
}

#[test]
fn unreserve_drops_mappings() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::new(1);
    let p = bench.attach(&mut ctx);

    let rsv = p.reserve_memory(0x8000, &mut ctx).unwrap();
    p.map(HOST_BUF, 0x1000, rsv, MapAttrs::empty(), &mut ctx)
        .unwrap();
    p.map(HOST_BUF + 0x10000, 0x2000, rsv + 0x4000, MapAttrs::empty(), &mut ctx)
        .unwrap();
    assert_eq!(bench.board.mappings().len(), 2);

    p.unreserve_memory(rsv, &mut ctx).unwrap();
    assert!(bench.board.mappings().is_empty());
    assert!(ctx.mappings().is_empty());
    assert!(ctx.reservations().is_empty());
    assert_eq!(bench.device().dmm_stats().alloc_blocks, 0);
}

#[test]
fn reserve_errors() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::new(1);
    let p = bench.attach(&mut ctx);

    assert_eq!(
        p.reserve_memory(0, &mut ctx).unwrap_err(),
        DspError::InvalidArg
    );
    assert_eq!(
        p.reserve_memory(DMM_POOL_SIZE + 0x1000, &mut ctx)
            .unwrap_err(),
        DspError::Memory
    );
    assert!(ctx.reservations().is_empty());
}

#[test]
fn released_chunks_are_reused() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::new(1);
    let p = bench.attach(&mut ctx);

    let a = p.reserve_memory(0x1000, &mut ctx).unwrap();
    let b = p.reserve_memory(0x1000, &mut ctx).unwrap();
    let c = p.reserve_memory(0x1000, &mut ctx).unwrap();
    assert_eq!(b, a + 0x1000);
    assert_eq!(c, b + 0x1000);

    p.unreserve_memory(a, &mut ctx).unwrap();
    p.unreserve_memory(b, &mut ctx).unwrap();

    // Both freed pages merge back into one chunk ahead of `c`.
    assert_eq!(p.reserve_memory(0x2000, &mut ctx), Ok(a));
    assert_eq!(p.reserve_memory(0x1000, &mut ctx), Ok(c + 0x1000));
}

#[test]
fn cache_maintenance() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::new(1);
    let p = bench.attach(&mut ctx);

    let rsv = p.reserve_memory(0x2000, &mut ctx).unwrap();
    p.map(HOST_BUF, 0x2000, rsv, MapAttrs::empty(), &mut ctx)
        .unwrap();

    p.flush_memory(HOST_BUF + 0x100, 0x100, 2).unwrap();
    p.flush_memory(HOST_BUF, 0x2000, 1).unwrap();
    p.invalidate_memory(HOST_BUF + 0x1000, 0x40).unwrap();
    assert_eq!(
        bench.board.cache_ops(),
        vec![
            CacheRecord {
                op: CacheOp::WritebackInvalidate,
                mpu_addr: HOST_BUF + 0x100,
                size: 0x100,
            },
            CacheRecord {
                op: CacheOp::Writeback,
                mpu_addr: HOST_BUF,
                size: 0x2000,
            },
            CacheRecord {
                op: CacheOp::Invalidate,
                mpu_addr: HOST_BUF + 0x1000,
                size: 0x40,
            },
        ]
    );

    assert_eq!(
        p.flush_memory(HOST_BUF, 0x100, 3).unwrap_err(),
        DspError::InvalidArg
    );
    assert_eq!(
        p.flush_memory(HOST_BUF, 0, 0).unwrap_err(),
        DspError::InvalidArg
    );
    // Runs past the end of the mapped buffer.
    assert_eq!(
        p.invalidate_memory(HOST_BUF + 0x1f00, 0x200).unwrap_err(),
        DspError::Fail
    );
    assert_eq!(
        p.invalidate_memory(HOST_BUF + 0x10000, 0x10).unwrap_err(),
        DspError::Fail
    );
    // Buffers wrapping the host address space.
    assert_eq!(
        p.flush_memory(usize::MAX, 1, 1).unwrap_err(),
        DspError::Fail
    );
    assert_eq!(
        p.invalidate_memory(usize::MAX - 0x10, 0x100).unwrap_err(),
        DspError::Fail
    );
    assert_eq!(bench.board.cache_ops().len(), 3);
}

#[test]
fn memory_belongs_to_its_context() {
    let bench = Bench::new();
    let mut owner = ProcessContext::new(1);
    let mut other = ProcessContext::new(2);
    let p = bench.attach(&mut owner);
    let q = bench.attach(&mut other);

    let rsv = p.reserve_memory(0x4000, &mut owner).unwrap();
    let addr = p
        .map(HOST_BUF, 0x1000, rsv, MapAttrs::empty(), &mut owner)
        .unwrap();

    assert_eq!(q.unmap(addr, &mut other).unwrap_err(), DspError::NotFound);
    assert_eq!(
        q.unreserve_memory(rsv, &mut other).unwrap_err(),
        DspError::NotFound
    );
    assert_eq!(
        q.map(HOST_BUF + 0x4000, 0x1000, rsv + 0x1000, MapAttrs::empty(), &mut other)
            .unwrap_err(),
        DspError::NotFound
    );
    assert_eq!(bench.board.mappings().len(), 1);
    assert!(other.mappings().is_empty());

    let own = q.reserve_memory(0x1000, &mut other).unwrap();
    q.map(HOST_BUF + 0x8000, 0x1000, own, MapAttrs::empty(), &mut other)
        .unwrap();

    drop(owner);
    let mmu = bench.board.mappings();
    assert_eq!(mmu.len(), 1);
    assert_eq!(mmu[0].0, own);
    assert_eq!(other.mappings(), &[own]);
    assert_eq!(other.reservations(), &[own]);

    q.unmap(own, &mut other).unwrap();
    q.unreserve_memory(own, &mut other).unwrap();
    assert!(bench.board.mappings().is_empty());
    assert_eq!(bench.device().dmm_stats().alloc_blocks, 0);
}

#[test]
fn context_release_tears_down_memory() {
    let bench = Bench::new();
    let mut keeper = ProcessContext::new(1);
    let p = bench.attach(&mut keeper);
    let kept = p.reserve_memory(0x1000, &mut keeper).unwrap();

    {
        let mut ctx = ProcessContext::new(2);
        let q = bench.attach(&mut ctx);
        let rsv = q.reserve_memory(0x4000, &mut ctx).unwrap();
        q.map(HOST_BUF, 0x1000, rsv, MapAttrs::empty(), &mut ctx)
            .unwrap();
        q.map(HOST_BUF + 0x2000, 0x1000, rsv + 0x2000, MapAttrs::empty(), &mut ctx)
            .unwrap();
        assert_eq!(bench.board.mappings().len(), 2);
        assert_eq!(bench.device().attached_count(), 2);
    }

    assert!(bench.board.mappings().is_empty());
    assert_eq!(bench.device().attached_count(), 1);
    assert_eq!(bench.device().dmm_stats().alloc_blocks, 1);

    let mut other = ProcessContext::new(3);
    let r = bench.attach(&mut other);
    let rsv = r.reserve_memory(0x1000, &mut other).unwrap();
    assert_eq!(rsv, kept + 0x1000);

    proc::detach(&mut other).unwrap();
    assert!(other.reservations().is_empty());
    assert_eq!(bench.device().dmm_stats().alloc_blocks, 1);
}
