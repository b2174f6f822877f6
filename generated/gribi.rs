/// 128-bit election identifier.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Uint128 {
    #[prost(uint64, tag = "1")]
    pub high: u64,
    #[prost(uint64, tag = "2")]
    pub low: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionParameters {
    #[prost(enumeration = "session_parameters::Redundancy", tag = "1")]
    pub redundancy: i32,
    #[prost(enumeration = "session_parameters::Persistence", tag = "2")]
    pub persistence: i32,
    #[prost(enumeration = "session_parameters::AckType", tag = "3")]
    pub ack_type: i32,
}
/// Nested message and enum types in `SessionParameters`.
pub mod session_parameters {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Redundancy {
        AllPrimary = 0,
        SinglePrimary = 1,
    }
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Persistence {
        Delete = 0,
        Preserve = 1,
    }
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum AckType {
        RibAck = 0,
        RibAndFibAck = 1,
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionParametersResult {
    #[prost(enumeration = "session_parameters_result::Status", tag = "1")]
    pub status: i32,
}
/// Nested message and enum types in `SessionParametersResult`.
pub mod session_parameters_result {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Status {
        Ok = 0,
        NotSupported = 1,
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModifyRequest {
    #[prost(message, repeated, tag = "1")]
    pub operation: ::prost::alloc::vec::Vec<AftOperation>,
    #[prost(message, optional, tag = "2")]
    pub election_id: ::core::option::Option<Uint128>,
    #[prost(message, optional, tag = "3")]
    pub params: ::core::option::Option<SessionParameters>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModifyResponse {
    #[prost(message, repeated, tag = "1")]
    pub result: ::prost::alloc::vec::Vec<AftResult>,
    #[prost(message, optional, tag = "2")]
    pub election_id: ::core::option::Option<Uint128>,
    #[prost(message, optional, tag = "3")]
    pub session_params_result: ::core::option::Option<SessionParametersResult>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AftOperation {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub network_instance: ::prost::alloc::string::String,
    #[prost(enumeration = "aft_operation::Operation", tag = "3")]
    pub op: i32,
    #[prost(message, optional, tag = "4")]
    pub election_id: ::core::option::Option<Uint128>,
    #[prost(oneof = "aft_operation::Entry", tags = "5, 6, 7")]
    pub entry: ::core::option::Option<aft_operation::Entry>,
}
/// Nested message and enum types in `AftOperation`.
pub mod aft_operation {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Operation {
        Invalid = 0,
        Add = 1,
        Replace = 2,
        Delete = 3,
    }
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Entry {
        #[prost(message, tag = "5")]
        Ipv4(super::Ipv4Entry),
        #[prost(message, tag = "6")]
        NextHopGroup(super::NextHopGroup),
        #[prost(message, tag = "7")]
        NextHop(super::NextHop),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AftResult {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(enumeration = "aft_result::Status", tag = "2")]
    pub status: i32,
    /// Nanoseconds since the unix epoch at which the device produced the result.
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(string, tag = "4")]
    pub error_details: ::prost::alloc::string::String,
}
/// Nested message and enum types in `AftResult`.
pub mod aft_result {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Status {
        Unset = 0,
        Ok = 1,
        Failed = 2,
        RibProgrammed = 3,
        FibProgrammed = 4,
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Decapsulate {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Encapsulate {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecapEncap {
    #[prost(string, tag = "1")]
    pub src_ip: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub dst_ips: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, tag = "3")]
    pub network_instance: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Subinterface {
    #[prost(uint32, tag = "1")]
    pub index: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InterfaceRef {
    #[prost(string, tag = "1")]
    pub interface: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub subinterface: ::core::option::Option<Subinterface>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NextHop {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    /// Empty when the next hop resolves in the operation's network instance.
    #[prost(string, tag = "7")]
    pub next_hop_network_instance: ::prost::alloc::string::String,
    #[prost(oneof = "next_hop::Action", tags = "2, 3, 4, 5, 6")]
    pub action: ::core::option::Option<next_hop::Action>,
}
/// Nested message and enum types in `NextHop`.
pub mod next_hop {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Action {
        #[prost(string, tag = "2")]
        IpAddress(::prost::alloc::string::String),
        #[prost(message, tag = "3")]
        Decapsulate(super::Decapsulate),
        #[prost(message, tag = "4")]
        Encapsulate(super::Encapsulate),
        #[prost(message, tag = "5")]
        DecapEncap(super::DecapEncap),
        #[prost(message, tag = "6")]
        InterfaceRef(super::InterfaceRef),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NextHopGroupMember {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub weight: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NextHopGroup {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(message, repeated, tag = "2")]
    pub next_hop: ::prost::alloc::vec::Vec<NextHopGroupMember>,
    /// Zero when the group has no backup.
    #[prost(uint64, tag = "3")]
    pub backup_next_hop_group: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ipv4Entry {
    #[prost(string, tag = "1")]
    pub prefix: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub next_hop_group: u64,
    /// Empty when the group lives in the operation's network instance.
    #[prost(string, tag = "3")]
    pub next_hop_group_network_instance: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlushRequest {
    #[prost(message, optional, tag = "1")]
    pub election_id: ::core::option::Option<Uint128>,
    #[prost(bool, tag = "2")]
    pub election_override: bool,
    #[prost(bool, tag = "3")]
    pub all_network_instances: bool,
    #[prost(string, tag = "4")]
    pub network_instance: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlushResponse {
    #[prost(enumeration = "flush_response::Status", tag = "1")]
    pub result: i32,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}
/// Nested message and enum types in `FlushResponse`.
pub mod flush_response {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Status {
        NotSpecified = 0,
        Ok = 1,
        NonZeroReferenceRemain = 2,
    }
}
#[doc = r" Generated client implementations."]
pub mod gribi_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = " Route injection service. A client opens one Modify stream, sends its session"]
    #[doc = " parameters and election id, then AFT operations. Results for each operation"]
    #[doc = " come back asynchronously on the same stream, correlated by operation id."]
    pub struct GribiClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GribiClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GribiClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn modify(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = super::ModifyRequest>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<super::ModifyResponse>>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/gribi.Gribi/Modify");
            self.inner
                .streaming(request.into_streaming_request(), path, codec)
                .await
        }
        pub async fn flush(
            &mut self,
            request: impl tonic::IntoRequest<super::FlushRequest>,
        ) -> Result<tonic::Response<super::FlushResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/gribi.Gribi/Flush");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GribiClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GribiClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GribiClient {{ ... }}")
        }
    }
}
#[doc = r" Generated server implementations."]
pub mod gribi_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GribiServer."]
    #[async_trait]
    pub trait Gribi: Send + Sync + 'static {
        #[doc = "Server streaming response type for the Modify method."]
        type ModifyStream: futures_core::Stream<Item = Result<super::ModifyResponse, tonic::Status>>
            + Send
            + Sync
            + 'static;
        async fn modify(
            &self,
            request: tonic::Request<tonic::Streaming<super::ModifyRequest>>,
        ) -> Result<tonic::Response<Self::ModifyStream>, tonic::Status>;
        async fn flush(
            &self,
            request: tonic::Request<super::FlushRequest>,
        ) -> Result<tonic::Response<super::FlushResponse>, tonic::Status>;
    }
    #[doc = " Route injection service. A client opens one Modify stream, sends its session"]
    #[doc = " parameters and election id, then AFT operations. Results for each operation"]
    #[doc = " come back asynchronously on the same stream, correlated by operation id."]
    #[derive(Debug)]
    pub struct GribiServer<T: Gribi> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: Gribi> GribiServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GribiServer<T>
    where
        T: Gribi,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/gribi.Gribi/Modify" => {
                    #[allow(non_camel_case_types)]
                    struct ModifySvc<T: Gribi>(pub Arc<T>);
                    impl<T: Gribi> tonic::server::StreamingService<super::ModifyRequest> for ModifySvc<T> {
                        type Response = super::ModifyResponse;
                        type ResponseStream = T::ModifyStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<tonic::Streaming<super::ModifyRequest>>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).modify(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1;
                        let inner = inner.0;
                        let method = ModifySvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/gribi.Gribi/Flush" => {
                    #[allow(non_camel_case_types)]
                    struct FlushSvc<T: Gribi>(pub Arc<T>);
                    impl<T: Gribi> tonic::server::UnaryService<super::FlushRequest> for FlushSvc<T> {
                        type Response = super::FlushResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::FlushRequest>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).flush(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = FlushSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: Gribi> Clone for GribiServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: Gribi> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: Gribi> tonic::transport::NamedService for GribiServer<T> {
        const NAME: &'static str = "gribi.Gribi";
    }
}
