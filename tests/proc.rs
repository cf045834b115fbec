mod common;

use std::sync::Arc;

use common::*;
use dspbridge::{
    board::{Board, BoardState, ProcLoadStat, SimBoard},
    config::{DeviceConfig, MemSegment, ProcessorAttrs},
    deh::ErrorInfo,
    error::{DSP_SALREADYATTACHED, DSP_SOK},
    node::NodeHandle,
    proc::{self, Attach, ProcState, ResourceInfo, ResourceType},
    DspError, Notification, NotifyType, ProcEvents, ProcessContext,
};

#[test]
fn attach_and_detach() {
    let bench = Bench::new();
    let mut first = ProcessContext::new(1);
    let mut second = ProcessContext::new(2);

    let a = proc::attach(&bench.driver, 0, None, &mut first).unwrap();
    assert!(matches!(a, Attach::Attached(_)));
    assert_eq!(a.status(), DSP_SOK);
    let a = a.into_processor();

    let attached = Notification::named("attach");
    a.register_notify(
        ProcEvents::PROCESSORATTACH.bits(),
        NotifyType::SIGNAL_EVENT,
        &attached,
    )
    .unwrap();

    let b = proc::attach(&bench.driver, 0, Some(&ProcessorAttrs { timeout_ms: 50 }), &mut second)
        .unwrap();
    assert!(matches!(b, Attach::AlreadyAttached(_)));
    assert_eq!(b.status(), DSP_SALREADYATTACHED);
    assert_eq!(attached.take(), ProcEvents::PROCESSORATTACH);
    assert_eq!(bench.device().attached_count(), 2);

    // Attaching again through the same context hands back the same handle.
    let again = proc::attach(&bench.driver, 0, None, &mut first).unwrap();
    assert!(again.processor().same(&a));
    assert_eq!(bench.device().attached_count(), 2);

    let detached = Notification::new();
    a.register_notify(
        ProcEvents::PROCESSORDETACH.bits(),
        NotifyType::SIGNAL_EVENT,
        &detached,
    )
    .unwrap();
    proc::detach(&mut first).unwrap();
    assert_eq!(detached.take(), ProcEvents::PROCESSORDETACH);
    assert!(first.processor().is_none());
    assert!(!a.is_valid());
    assert_eq!(a.state().unwrap_err(), DspError::Handle);
    assert_eq!(a.processor_id().unwrap_err(), DspError::Handle);
    assert_eq!(proc::detach(&mut first).unwrap_err(), DspError::Handle);
    assert_eq!(bench.device().attached_count(), 1);

    // The remaining client is alone again.
    drop(second);
    let c = proc::attach(&bench.driver, 0, None, &mut first).unwrap();
    assert!(matches!(c, Attach::Attached(_)));
}

#[test]
fn attach_unknown_processor() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::new(1);

    assert_eq!(
        proc::attach(&bench.driver, 1, None, &mut ctx).unwrap_err(),
        DspError::Fail
    );
    assert!(ctx.processor().is_none());
}

#[test]
fn processor_identity() {
    let mut bench = Bench::new();
    let second = Arc::new(SimBoard::new(MEM_BASE, MEM_SIZE));
    let dev = bench
        .driver
        .add_device(second, DeviceConfig::default())
        .unwrap();
    assert_eq!(dev.processor_id(), 1);

    let mut ctx = ProcessContext::new(1);
    let p = proc::attach(&bench.driver, 1, None, &mut ctx)
        .unwrap()
        .into_processor();
    assert_eq!(p.processor_id(), Ok(1));
    assert!(Arc::ptr_eq(&p.dev_object().unwrap(), &dev));
}

#[test]
fn load_start_stop() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::privileged(1);
    let p = bench.attach(&mut ctx);

    let state = Notification::new();
    p.register_notify(
        ProcEvents::PROCESSORSTATECHANGE.bits(),
        NotifyType::SIGNAL_EVENT,
        &state,
    )
    .unwrap();

    assert_eq!(p.state().unwrap().state, ProcState::Stopped);

    p.load(&[IMAGE, "-v"], &["DEBUG=1"]).unwrap();
    assert_eq!(p.state().unwrap().state, ProcState::Loaded);
    assert_eq!(bench.device().state(), ProcState::Loaded);
    assert_eq!(bench.device().loaded_image().as_deref(), Some(IMAGE));
    assert_eq!(bench.board.peek(MEM_BASE, 4).unwrap(), vec![0x11; 4]);
    assert_eq!(bench.board.peek(MEM_BASE + 0x200, 4).unwrap(), vec![0; 4]);

    // argc, then the argument and environment vectors with PROC_ID first.
    assert_eq!(bench.board.peek_u32(ARGS), Some(2));
    let argv = bench.board.peek_u32(ARGS + 4).unwrap();
    let envp = bench.board.peek_u32(ARGS + 8).unwrap();
    let arg1 = bench.board.peek_u32(argv + 4).unwrap();
    assert_eq!(read_cstr(&bench.board, arg1), "-v");
    let env0 = bench.board.peek_u32(envp).unwrap();
    let env1 = bench.board.peek_u32(envp + 4).unwrap();
    assert_eq!(read_cstr(&bench.board, env0), "PROC_ID=0");
    assert_eq!(read_cstr(&bench.board, env1), "DEBUG=1");
    assert_eq!(bench.board.peek_u32(envp + 8), Some(0));

    state.take();
    p.start().unwrap();
    assert_eq!(bench.board.entry(), Some(ENTRY));
    assert_eq!(p.state().unwrap().state, ProcState::Running);
    assert_eq!(state.take(), ProcEvents::PROCESSORSTATECHANGE);

    assert_eq!(p.start().unwrap_err(), DspError::WrongState);

    p.stop().unwrap();
    assert_eq!(p.state().unwrap().state, ProcState::Stopped);
    assert!(state.is_signaled());
}

#[test]
fn start_requires_loaded_image() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::privileged(1);
    let p = bench.attach(&mut ctx);

    assert_eq!(p.start().unwrap_err(), DspError::WrongState);

    p.load(&[IMAGE], &[]).unwrap();
    bench.board.fail_next_start();
    assert_eq!(p.start().unwrap_err(), DspError::Fail);
    assert_eq!(bench.device().state(), ProcState::Stopped);
    assert_eq!(bench.board.status(), Ok(BoardState::Stopped));
    assert_eq!(p.start().unwrap_err(), DspError::WrongState);
}

#[test]
fn load_errors() {
    let bench = Bench::new();

    let mut plain = ProcessContext::new(1);
    let p = bench.attach(&mut plain);
    assert_eq!(p.load(&[IMAGE], &[]).unwrap_err(), DspError::AccessDenied);
    assert_eq!(p.ctrl(1, &[]).unwrap_err(), DspError::AccessDenied);

    let mut oem = ProcessContext::privileged(2);
    let p = bench.attach(&mut oem);
    assert_eq!(p.load(&[], &[]).unwrap_err(), DspError::InvalidArg);
    assert_eq!(p.load(&["missing.out"], &[]).unwrap_err(), DspError::File);

    bench.images.insert("junk.out", b"\x7fELF garbage".to_vec());
    assert_eq!(p.load(&["junk.out"], &[]).unwrap_err(), DspError::CorruptFile);
    assert_eq!(bench.device().state(), ProcState::Stopped);
    assert_eq!(bench.device().loaded_image(), None);
}

#[test]
fn nodes_block_stop() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::privileged(1);
    let p = bench.running(&mut ctx);
    let dev = bench.device();

    let node = dev.allocate_node("echo", MemSegment::Daram, 0x100).unwrap();
    assert_eq!(dev.node_count(), 1);
    assert_eq!(dev.node_info(node).unwrap().name, "echo");

    assert_eq!(p.stop().unwrap_err(), DspError::WrongState);
    assert_eq!(p.load(&[IMAGE], &[]).unwrap_err(), DspError::WrongState);

    dev.delete_node(node).unwrap();
    p.stop().unwrap();
    assert_eq!(
        dev.allocate_node("echo", MemSegment::Daram, 0x100).unwrap_err(),
        DspError::WrongState
    );
}

#[test]
fn enum_nodes() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::privileged(1);
    let p = bench.attach(&mut ctx);

    let mut table = [NodeHandle::default(); 4];
    assert_eq!(p.enum_nodes(&mut table).unwrap_err(), DspError::Fail);

    p.load(&[IMAGE], &[]).unwrap();
    p.start().unwrap();
    let dev = bench.device();
    let a = dev.allocate_node("a", MemSegment::Daram, 0x80).unwrap();
    let b = dev.allocate_node("b", MemSegment::External, 0x1000).unwrap();

    let mut small = [NodeHandle::default(); 1];
    assert_eq!(p.enum_nodes(&mut small).unwrap_err(), DspError::Size);

    let count = p.enum_nodes(&mut table).unwrap();
    assert_eq!(count.written, 2);
    assert_eq!(count.allocated, 2);
    assert_eq!(&table[..2], &[a, b]);

    dev.delete_node(a).unwrap();
    dev.delete_node(b).unwrap();
}

#[test]
fn resource_info() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::privileged(1);
    let p = bench.attach(&mut ctx);

    assert_eq!(
        p.resource_info(ResourceType::DynDaram).unwrap_err(),
        DspError::WrongState
    );

    p.load(&[IMAGE], &[]).unwrap();
    p.start().unwrap();

    match p.resource_info(ResourceType::DynDaram).unwrap() {
        ResourceInfo::Memory(stat) => {
            assert_eq!(stat.size, 0x1_0000);
            assert_eq!(stat.total_free, 0x1_0000);
            assert_eq!(stat.alloc_blocks, 0);
        }
        other => panic!("unexpected {:?}", other),
    }

    let node = bench
        .device()
        .allocate_node("n", MemSegment::Daram, 0x1000)
        .unwrap();
    match p.resource_info(ResourceType::DynDaram).unwrap() {
        ResourceInfo::Memory(stat) => {
            assert_eq!(stat.total_free, 0xf000);
            assert_eq!(stat.alloc_blocks, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    bench.device().delete_node(node).unwrap();

    assert_eq!(
        p.resource_info(ResourceType::DynSram).unwrap_err(),
        DspError::Fail
    );

    let load = ProcLoadStat {
        curr_load: 42,
        predicted_load: 50,
        curr_dsp_freq: 430_000,
        predicted_freq: 520_000,
    };
    bench.board.set_load(load);
    assert_eq!(
        p.resource_info(ResourceType::ProcLoad).unwrap(),
        ResourceInfo::ProcLoad(load)
    );

    assert_eq!(ResourceType::try_from(4), Ok(ResourceType::ProcLoad));
    assert_eq!(ResourceType::try_from(5), Err(DspError::InvalidArg));
}

#[test]
fn trace_buffer() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::privileged(1);
    let p = bench.attach(&mut ctx);

    let mut buf = [0u8; 0x100];
    assert_eq!(p.trace(&mut buf).unwrap_err(), DspError::Fail);
    assert_eq!(p.trace(&mut []).unwrap_err(), DspError::InvalidArg);

    p.load(&[IMAGE], &[]).unwrap();
    bench.board.poke(TRACE_BEG, b"hello from the DSP");

    let mut small = [0u8; 5];
    assert_eq!(p.trace(&mut small), Ok(5));
    assert_eq!(&small, b"hello");

    assert_eq!(p.trace(&mut buf), Ok((TRACE_END - TRACE_BEG) as usize));
    assert_eq!(&buf[..18], b"hello from the DSP");
}

#[test]
fn ctrl_requests() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::privileged(1);
    let p = bench.running(&mut ctx);

    p.ctrl(0x10, &[1, 2, 3]).unwrap();
    assert_eq!(bench.board.ctrl_log(), vec![(0x10, vec![1, 2, 3])]);

    bench.board.set_ctrl_timeout(true);
    assert_eq!(p.ctrl(0x11, &[]).unwrap_err(), DspError::Timeout);
}

#[test]
fn auto_start() {
    let bench = Bench::with_config(auto_start_config());
    let dev = bench.device();

    assert_eq!(dev.state(), ProcState::Running);
    assert!(dev.is_auto_started());
    assert_eq!(bench.board.entry(), Some(ENTRY));
    assert_eq!(dev.attached_count(), 0);
}

#[test]
fn auto_start_without_executable() {
    let mut config = auto_start_config();
    config.node.default_executable = None;
    let bench = Bench::with_config(config);

    assert_eq!(bench.device().state(), ProcState::Stopped);
    assert!(!bench.device().is_auto_started());
    assert_eq!(
        proc::auto_start(&bench.device().config().node, bench.device()).unwrap_err(),
        DspError::File
    );
}

#[test]
fn fatal_error_and_recovery() {
    let bench = Bench::with_config(auto_start_config());
    let mut ctx = ProcessContext::privileged(1);
    let p = bench.attach(&mut ctx);

    let restart = Notification::named("restart");
    p.register_notify(
        (ProcEvents::PROCESSORRESTART | ProcEvents::PROCESSORSTATECHANGE).bits(),
        NotifyType::SIGNAL_EVENT,
        &restart,
    )
    .unwrap();

    let info = ErrorInfo {
        val1: 0xdead_0000,
        ..ErrorInfo::default()
    };
    bench
        .device()
        .report_exception(ProcEvents::MMUFAULT, info)
        .unwrap();

    let state = p.state().unwrap();
    assert_eq!(state.state, ProcState::Error);
    assert_eq!(state.err_info.err_mask, ProcEvents::MMUFAULT.bits());
    assert_eq!(state.err_info.val1, 0xdead_0000);
    assert_eq!(restart.take(), ProcEvents::PROCESSORSTATECHANGE);

    assert_eq!(p.ctrl(1, &[]).unwrap_err(), DspError::Restarting);
    assert_eq!(
        p.resource_info(ResourceType::ProcLoad).unwrap_err(),
        DspError::Restarting
    );
    assert_eq!(p.trace(&mut [0u8; 4]).unwrap_err(), DspError::Restarting);
    assert_eq!(
        p.enum_nodes(&mut [NodeHandle::default(); 1]).unwrap_err(),
        DspError::Restarting
    );

    proc::recover(bench.device()).unwrap();
    assert!(restart
        .take()
        .contains(ProcEvents::PROCESSORRESTART | ProcEvents::PROCESSORSTATECHANGE));
    assert_eq!(p.state().unwrap().state, ProcState::Running);
    assert_eq!(p.state().unwrap().err_info, ErrorInfo::default());
    assert!(!bench.device().is_restarting());
    p.ctrl(1, &[]).unwrap();

    assert_eq!(
        proc::recover(bench.device()).unwrap_err(),
        DspError::WrongState
    );
}

#[test]
fn recovery_without_auto_start() {
    let bench = Bench::new();
    let mut ctx = ProcessContext::privileged(1);
    let p = bench.running(&mut ctx);

    bench
        .device()
        .report_exception(ProcEvents::WDTOVERFLOW, ErrorInfo::default())
        .unwrap();
    proc::recover(bench.device()).unwrap();
    assert_eq!(p.state().unwrap().state, ProcState::Stopped);

    // A client reloads the DSP itself.
    p.load(&[IMAGE], &[]).unwrap();
    p.start().unwrap();
    assert_eq!(p.state().unwrap().state, ProcState::Running);
}

#[test]
fn report_exception_rejects_non_error_events() {
    let bench = Bench::new();

    assert_eq!(
        bench
            .device()
            .report_exception(ProcEvents::PROCESSORATTACH, ErrorInfo::default())
            .unwrap_err(),
        DspError::Value
    );
    assert_eq!(
        bench
            .device()
            .report_exception(ProcEvents::empty(), ErrorInfo::default())
            .unwrap_err(),
        DspError::Value
    );
    assert_eq!(bench.device().state(), ProcState::Stopped);
}
