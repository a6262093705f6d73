//! Integration tests for webnn-wire.
//!
//! A client and a server talk over in-memory pipes; each test pumps the
//! pipes by hand so the order of events is deterministic.

use std::sync::{Arc, Mutex};

use webnn_wire::client::{Context, Graph, NamedInputs, NamedOutputs, OperationResult};
use webnn_wire::native::ops::{BinaryKind, UnaryKind};
use webnn_wire::native::{
    Backend, BackendGraph, ContextOptions, ErrorFilter, ErrorType, NamedInputs as NativeNamedInputs,
    NamedOutputs as NativeNamedOutputs, NativeProcs, NativeResult, NodeId, NullBackend, OperandDescriptor,
    OperandType, Operation, Procs,
};
use webnn_wire::protocol::{Command, RecordHeader, CHUNK_KIND};
use webnn_wire::transport::{memory_pipe, CommandHandler, MemoryReceiver};
use webnn_wire::{
    Client, ConnectionState, DisconnectReason, ObjectHandle, ObjectType, Proxy, Server, WireConfig, WireError,
};

/// Backend whose outputs are filled with a marker byte.
struct FillBackend(u8);

struct FillGraph(u8);

impl Backend for FillBackend {
    fn name(&self) -> &'static str {
        "fill"
    }

    fn create_graph(&self) -> NativeResult<Box<dyn BackendGraph>> {
        Ok(Box::new(FillGraph(self.0)))
    }
}

impl BackendGraph for FillGraph {
    fn add_input(&mut self, _node: NodeId, _name: &str, _desc: &OperandDescriptor) -> NativeResult<()> {
        Ok(())
    }

    fn add_constant(&mut self, _node: NodeId, _desc: &OperandDescriptor, _data: &[u8]) -> NativeResult<()> {
        Ok(())
    }

    fn add_operator(
        &mut self,
        _operation: &Operation,
        _inputs: &[NodeId],
        _outputs: &[(NodeId, OperandDescriptor)],
    ) -> NativeResult<()> {
        Ok(())
    }

    fn add_output(&mut self, _name: &str, _node: NodeId, _desc: &OperandDescriptor) -> NativeResult<()> {
        Ok(())
    }

    fn finish(&mut self) -> NativeResult<()> {
        Ok(())
    }

    fn compile(&mut self) -> NativeResult<()> {
        Ok(())
    }

    fn compute(&self, _inputs: &NativeNamedInputs, outputs: &mut NativeNamedOutputs) -> NativeResult<()> {
        let names: Vec<String> = outputs.iter().map(|(name, _)| name.to_string()).collect();
        for name in names {
            if let Some(buffer) = outputs.output_mut(&name) {
                buffer.fill(self.0);
            }
        }
        Ok(())
    }
}

type Calls = Arc<Mutex<Vec<(ErrorType, String)>>>;

fn recorder(calls: &Calls) -> impl FnOnce(ErrorType, &str) + Send + 'static {
    let calls = calls.clone();
    move |ty, msg| calls.lock().unwrap().push((ty, msg.to_string()))
}

struct Harness {
    client: Client,
    server: Server,
    to_server: MemoryReceiver,
    to_client: MemoryReceiver,
    procs: Arc<dyn Procs>,
}

impl Harness {
    fn new(procs: Arc<dyn Procs>, config: WireConfig) -> Self {
        let (client_out, to_server) = memory_pipe(config.max_allocation_size);
        let (server_out, to_client) = memory_pipe(config.max_allocation_size);
        Self {
            client: Client::new(Box::new(client_out), config),
            server: Server::new(procs.clone(), Box::new(server_out), config),
            to_server,
            to_client,
            procs,
        }
    }

    fn fill(marker: u8) -> Self {
        Self::new(
            Arc::new(NativeProcs::new(Arc::new(FillBackend(marker)))),
            WireConfig::default(),
        )
    }

    /// Flush the client and deliver both directions once.
    fn pump(&mut self) {
        self.client.flush().unwrap();
        self.to_server.deliver(&mut self.server).unwrap();
        self.to_client.deliver(&mut self.client).unwrap();
    }

    fn context(&mut self) -> Context {
        let instance = self.client.reserve_instance().unwrap();
        self.server
            .inject_instance(instance.handle(), self.procs.create_instance())
            .unwrap();
        self.client
            .instance_create_context(instance, ContextOptions::default())
            .unwrap()
    }

    /// Build `y = relu(x)` over float32[2] and bind inputs and outputs.
    fn relu_graph(&mut self, context: Context) -> (Graph, NamedInputs, NamedOutputs) {
        let client = &mut self.client;
        let desc = OperandDescriptor::new(OperandType::Float32, vec![2]);
        let builder = client.context_create_graph_builder(context).unwrap();
        let x = client.graph_builder_input(builder, "x", &desc).unwrap();
        let OperationResult::Operand(y) = client
            .graph_builder_operation(builder, Operation::Unary(UnaryKind::Relu), &[x])
            .unwrap()
        else {
            panic!("relu yields one operand");
        };
        let named = client.create_named_operands().unwrap();
        client.named_operands_set(named, "y", y).unwrap();
        let graph = client.graph_builder_build(builder, named).unwrap();

        let inputs = client.create_named_inputs().unwrap();
        client.named_inputs_set(inputs, "x", &[], &[0u8; 8]).unwrap();
        let outputs = client.create_named_outputs().unwrap();
        client.named_outputs_set_output(outputs, "y", 8).unwrap();
        (graph, inputs, outputs)
    }
}

#[test]
fn test_build_compute_and_destroy() {
    let mut h = Harness::fill(0xAB);
    let context = h.context();
    let (graph, inputs, outputs) = h.relu_graph(context);

    let calls = Calls::default();
    h.client
        .context_compute(context, graph, inputs, outputs, recorder(&calls))
        .unwrap();
    h.pump();

    assert_eq!(*calls.lock().unwrap(), vec![(ErrorType::NoError, String::new())]);
    assert_eq!(h.client.named_outputs_result(outputs, "y").unwrap(), Some(&[0xABu8; 8][..]));
    assert!(h.server.has_object(ObjectType::Graph, graph.id()));
    assert!(!h.server.is_disconnected());

    h.client.release(graph).unwrap();
    h.pump();
    assert!(!h.server.has_object(ObjectType::Graph, graph.id()));
    assert_eq!(h.server.object_count(ObjectType::Graph), 0);
    assert_eq!(h.client.object_count(ObjectType::Graph), 0);
}

#[test]
fn test_graph_id_agreed_by_client() {
    let mut h = Harness::fill(0x11);
    let context = h.context();
    let (first, inputs, outputs) = h.relu_graph(context);

    // Six more builds from one builder; the last gets id 7 on both sides.
    let builder = h.client.context_create_graph_builder(context).unwrap();
    let desc = OperandDescriptor::new(OperandType::Float32, vec![2]);
    let x = h.client.graph_builder_input(builder, "x", &desc).unwrap();
    let named = h.client.create_named_operands().unwrap();
    h.client.named_operands_set(named, "y", x).unwrap();
    let mut graph = first;
    for _ in 0..6 {
        graph = h.client.graph_builder_build(builder, named).unwrap();
    }
    assert_eq!(graph.handle(), ObjectHandle::new(7, 0));

    h.client.context_compute_sync(context, graph, inputs, outputs).unwrap();
    h.pump();
    assert!(h.server.has_object(ObjectType::Graph, 7));
    assert_eq!(h.client.named_outputs_result(outputs, "y").unwrap(), Some(&[0x11u8; 8][..]));

    h.client.release(graph).unwrap();
    h.pump();
    assert!(!h.server.has_object(ObjectType::Graph, 7));
    assert_eq!(h.server.object_count(ObjectType::Graph), 6);
    assert!(!h.server.is_disconnected());
}

#[test]
fn test_sync_compute_streams_results() {
    let mut h = Harness::fill(7);
    let context = h.context();
    let (graph, inputs, outputs) = h.relu_graph(context);

    h.client.context_compute_sync(context, graph, inputs, outputs).unwrap();
    h.pump();
    assert_eq!(h.client.named_outputs_result(outputs, "y").unwrap(), Some(&[7u8; 8][..]));
    assert_eq!(h.server.named_outputs_data(outputs.id(), "y"), Some(vec![7u8; 8]));
}

#[test]
fn test_unknown_id_is_reported_and_connection_survives() {
    let mut h = Harness::fill(0);
    let context = h.context();
    h.pump();

    let errors = Calls::default();
    h.client.set_uncaptured_error_callback(Some(Box::new({
        let errors = errors.clone();
        move |ty, msg| errors.lock().unwrap().push((ty, msg.to_string()))
    })));

    // A proxy the client never created is rejected before reaching the wire.
    let bogus = Graph::from_handle(ObjectHandle::new(42, 0));
    let inputs = h.client.create_named_inputs().unwrap();
    let outputs = h.client.create_named_outputs().unwrap();
    let err = h
        .client
        .context_compute_sync(context, bogus, inputs, outputs)
        .unwrap_err();
    assert!(matches!(err, WireError::StaleHandle { id: 42, .. }));

    // The same reference sent raw is answered with a CommandError.
    let raw = Command::ContextComputeSync {
        context: context.id(),
        graph: 42,
        inputs: inputs.id(),
        outputs: outputs.id(),
    };
    h.pump();
    h.server.handle_commands(&raw.encode().unwrap()).unwrap();
    h.to_client.deliver(&mut h.client).unwrap();

    assert_eq!(h.server.state(), &ConnectionState::Active);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorType::Validation);
    assert!(errors[0].1.contains("Unknown Graph object id 42"));
}

#[test]
fn test_error_scope_captures_bad_constant() {
    let mut h = Harness::new(Arc::new(NativeProcs::null()), WireConfig::default());
    let context = h.context();
    let builder = h.client.context_create_graph_builder(context).unwrap();

    h.client.context_push_error_scope(context, ErrorFilter::Validation).unwrap();
    let desc = OperandDescriptor::new(OperandType::Float32, vec![2]);
    h.client.graph_builder_constant(builder, &desc, &[1, 2, 3]).unwrap();
    let calls = Calls::default();
    assert!(h.client.context_pop_error_scope(context, recorder(&calls)).unwrap());
    h.pump();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, ErrorType::Validation);
    assert!(calls[0].1.contains("constant holds 3 bytes"));
}

#[test]
fn test_uncaptured_error_from_sync_compute() {
    let mut h = Harness::fill(1);
    let context = h.context();
    let (graph, _inputs, outputs) = h.relu_graph(context);

    let errors = Calls::default();
    h.client.set_uncaptured_error_callback(Some(Box::new({
        let errors = errors.clone();
        move |ty, msg| errors.lock().unwrap().push((ty, msg.to_string()))
    })));

    // Nothing bound to "x".
    let empty = h.client.create_named_inputs().unwrap();
    h.client.context_compute_sync(context, graph, empty, outputs).unwrap();
    h.pump();

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorType::Validation);
    assert!(errors[0].1.contains("input x is not bound"));
}

#[test]
fn test_multi_output_operation_over_the_wire() {
    let mut h = Harness::fill(3);
    let context = h.context();
    let client = &mut h.client;
    let desc = OperandDescriptor::new(OperandType::Float32, vec![4]);
    let builder = client.context_create_graph_builder(context).unwrap();
    let x = client.graph_builder_input(builder, "x", &desc).unwrap();
    let split = Operation::Split {
        splits: vec![2],
        axis: 0,
    };
    let OperationResult::Array(parts) = client.graph_builder_operation(builder, split, &[x]).unwrap() else {
        panic!("split yields an array");
    };
    let a = client.operand_array_get(parts, 0).unwrap();
    let b = client.operand_array_get(parts, 1).unwrap();
    let OperationResult::Operand(sum) = client
        .graph_builder_operation(builder, Operation::Binary(BinaryKind::Add), &[a, b])
        .unwrap()
    else {
        panic!("add yields one operand");
    };
    let named = client.create_named_operands().unwrap();
    client.named_operands_set(named, "sum", sum).unwrap();
    client.graph_builder_build(builder, named).unwrap();
    h.client.context_push_error_scope(context, ErrorFilter::Validation).unwrap();
    let calls = Calls::default();
    h.client.context_pop_error_scope(context, recorder(&calls)).unwrap();
    h.pump();

    assert_eq!(h.server.object_count(ObjectType::OperandArray), 1);
    assert_eq!(h.server.object_count(ObjectType::Graph), 1);
    assert_eq!(calls.lock().unwrap()[0].0, ErrorType::NoError);
}

#[test]
fn test_large_constant_is_chunked_and_reassembled() {
    let config = WireConfig::new().max_allocation_size(256);
    let mut h = Harness::new(Arc::new(NativeProcs::null()), config);
    let context = h.context();
    let builder = h.client.context_create_graph_builder(context).unwrap();

    let desc = OperandDescriptor::new(OperandType::Float32, vec![1000]);
    let data: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();
    h.client.context_push_error_scope(context, ErrorFilter::Validation).unwrap();
    h.client.graph_builder_constant(builder, &desc, &data).unwrap();
    let calls = Calls::default();
    h.client.context_pop_error_scope(context, recorder(&calls)).unwrap();
    h.pump();

    assert_eq!(*calls.lock().unwrap(), vec![(ErrorType::NoError, String::new())]);
    assert_eq!(h.server.object_count(ObjectType::Operand), 1);
    assert_eq!(h.to_server.pending_len(), 0);
}

#[test]
fn test_record_at_allocation_size_is_not_chunked() {
    let max = 256;
    let (out, mut rx) = memory_pipe(max);
    let mut client = Client::new(Box::new(out), WireConfig::new().max_allocation_size(max));
    let inputs = client.reserve_named_inputs().unwrap();

    let empty = Command::NamedInputsSet {
        named_inputs: inputs.id(),
        name: "x".into(),
        dimensions: vec![],
        data: vec![],
    };
    let fixed = empty.encode().unwrap().len();

    client.named_inputs_set(inputs, "x", &[], &vec![0u8; max - fixed]).unwrap();
    client.flush().unwrap();
    let bytes = rx.try_recv().unwrap();
    assert_eq!(bytes.len(), max);
    assert_ne!(RecordHeader::decode(&bytes).unwrap().kind, CHUNK_KIND);

    client.named_inputs_set(inputs, "x", &[], &vec![0u8; max - fixed + 1]).unwrap();
    client.flush().unwrap();
    let mut chunked = Vec::new();
    while let Some(bytes) = rx.try_recv() {
        chunked.extend_from_slice(&bytes);
    }
    assert_eq!(RecordHeader::decode(&chunked).unwrap().kind, CHUNK_KIND);
}

#[test]
fn test_transport_closed_mid_stream() {
    let config = WireConfig::default();
    let (client_out, to_server) = memory_pipe(config.max_allocation_size);
    let (server_out, mut to_client) = memory_pipe(config.max_allocation_size);
    let procs: Arc<dyn Procs> = Arc::new(NativeProcs::new(Arc::new(NullBackend)));
    let mut client = Client::new(Box::new(client_out), config);
    let mut server = Server::new(procs.clone(), Box::new(server_out), config);
    let mut to_server = to_server;

    let instance = client.reserve_instance().unwrap();
    server.inject_instance(instance.handle(), procs.create_instance()).unwrap();
    let context = client.instance_create_context(instance, ContextOptions::default()).unwrap();
    let builder = client.context_create_graph_builder(context).unwrap();
    let desc = OperandDescriptor::new(OperandType::Float32, vec![2]);
    client.graph_builder_input(builder, "x", &desc).unwrap();
    client.flush().unwrap();
    to_server.deliver(&mut server).unwrap();
    to_client.deliver(&mut client).unwrap();
    assert_eq!(server.object_count(ObjectType::Operand), 1);

    // A compute is queued but the server side of the pipe goes away.
    let inputs = client.create_named_inputs().unwrap();
    let outputs = client.create_named_outputs().unwrap();
    let calls = Calls::default();
    let named = client.create_named_operands().unwrap();
    let graph = client.graph_builder_build(builder, named).unwrap();
    client
        .context_compute(context, graph, inputs, outputs, recorder(&calls))
        .unwrap();
    drop(to_server);

    assert!(client.flush().is_err());
    assert!(client.is_disconnected());
    assert_eq!(
        *calls.lock().unwrap(),
        vec![(ErrorType::DeviceLost, "WebNN context disconnected".to_string())]
    );
    for ty in ObjectType::ALL {
        assert_eq!(client.object_count(ty), 0);
    }

    // The host notices the closed transport and releases the server side.
    server.disconnect();
    server.disconnect();
    assert_eq!(server.state(), &ConnectionState::Disconnected(DisconnectReason::Clean));
    for ty in ObjectType::ALL {
        assert_eq!(server.object_count(ty), 0);
    }
    assert!(matches!(server.handle_commands(&[]), Err(WireError::Disconnected)));
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[test]
fn test_client_disconnect_closes_server_cleanly() {
    let mut h = Harness::fill(0);
    let context = h.context();
    h.relu_graph(context);
    h.pump();
    assert!(h.server.object_count(ObjectType::Operand) > 0);

    h.client.disconnect();
    h.to_server.deliver(&mut h.server).unwrap();

    assert_eq!(h.server.state(), &ConnectionState::Disconnected(DisconnectReason::Clean));
    for ty in ObjectType::ALL {
        assert_eq!(h.server.object_count(ty), 0);
        assert_eq!(h.client.object_count(ty), 0);
    }
}

#[test]
fn test_dropping_the_client_releases_server_objects() {
    let mut h = Harness::fill(0);
    let context = h.context();
    h.relu_graph(context);
    h.pump();

    let Harness {
        client,
        mut server,
        mut to_server,
        ..
    } = h;
    drop(client);
    // Destroys arrive, then the closed pipe is observed.
    assert!(!to_server.deliver(&mut server).unwrap());
    for ty in ObjectType::ALL {
        assert_eq!(server.object_count(ty), 0, "{:?} left behind", ty);
    }
}

#[tokio::test]
async fn test_pipe_connection_over_duplex() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use webnn_wire::host::Connection;
    use webnn_wire::protocol::ReturnCommand;
    use webnn_wire::writer::WriterConfig;

    let (peer, host) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host);
    let procs: Arc<dyn Procs> = Arc::new(NativeProcs::null());
    let config = WireConfig::default();
    let mut connection = Connection::new(host_read, host_write, procs.clone(), config, WriterConfig::default());
    connection
        .server_mut()
        .inject_instance(ObjectHandle::new(1, 0), procs.create_instance())
        .unwrap();
    let task = tokio::spawn(connection.run());

    // Drive a client through its memory pipe and forward the bytes.
    let (client_out, mut outgoing) = memory_pipe(config.max_allocation_size);
    let mut client = Client::new(Box::new(client_out), config);
    let instance = client.reserve_instance().unwrap();
    assert_eq!(instance.handle(), ObjectHandle::new(1, 0));
    let context = client.instance_create_context(instance, ContextOptions::default()).unwrap();
    client.context_push_error_scope(context, ErrorFilter::Validation).unwrap();
    let calls = Calls::default();
    client.context_pop_error_scope(context, recorder(&calls)).unwrap();
    client.flush().unwrap();

    let (mut peer_read, mut peer_write) = tokio::io::split(peer);
    while let Some(bytes) = outgoing.try_recv() {
        peer_write.write_all(&bytes).await.unwrap();
    }
    peer_write.write_all(&Command::Disconnect.encode().unwrap()).await.unwrap();

    let state = task.await.unwrap().unwrap();
    assert_eq!(state, ConnectionState::Disconnected(DisconnectReason::Clean));

    let mut returned = Vec::new();
    peer_read.read_to_end(&mut returned).await.unwrap();
    let header = RecordHeader::decode(&returned).unwrap();
    assert_eq!(header.record_len(), returned.len());
    assert!(matches!(
        ReturnCommand::decode(&returned).unwrap(),
        ReturnCommand::ContextPopErrorScopeCallback {
            error_type: ErrorType::NoError,
            ..
        }
    ));

    let rest = client.handle_commands(&returned).unwrap();
    assert!(rest.is_empty());
    assert_eq!(*calls.lock().unwrap(), vec![(ErrorType::NoError, String::new())]);
}
